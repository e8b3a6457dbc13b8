//! Planner and dispatch configuration that downstream crates can serialize/deserialize.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::PartyId;

/// Execution backends a job can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Python,
    Spark,
    SingleParty,
    OblivC,
    Motion,
    Sharemind,
    Jiff,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::Python,
        BackendKind::Spark,
        BackendKind::SingleParty,
        BackendKind::OblivC,
        BackendKind::Motion,
        BackendKind::Sharemind,
        BackendKind::Jiff,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Python => "python",
            BackendKind::Spark => "spark",
            BackendKind::SingleParty => "single-party",
            BackendKind::OblivC => "obliv-c",
            BackendKind::Motion => "motion",
            BackendKind::Sharemind => "sharemind",
            BackendKind::Jiff => "jiff",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str() == norm || k.as_str().replace('-', "") == norm)
            .ok_or_else(|| Error::Config(format!("unknown backend '{s}'")))
    }
}

/// Network address of one party's peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAddr {
    pub id: PartyId,
    pub host: String,
    pub port: u16,
}

impl PartyAddr {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Local settings for one backend. Presence in `DispatchConfig::backends`
/// means the backend is configured on this peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Program override (interpreter or launcher) for the job artifact.
    #[serde(default)]
    pub program: Option<String>,
    /// External service URL, e.g. the Spark master or the JIFF server.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// The party this peer acts for.
    pub local: PartyId,

    /// Address book of every party's peer (may be empty for in-process runs).
    pub parties: Vec<PartyAddr>,

    /// Backends configured on this peer.
    pub backends: BTreeMap<BackendKind, BackendSettings>,

    /// Upper bound on a barrier wait. `None` waits indefinitely.
    pub barrier_timeout_ms: Option<u64>,

    /// Retry policy when connecting to a peer.
    pub connect_max_retries: usize,
    pub connect_initial_backoff_ms: u64,
    pub connect_max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            local: PartyId::new(1),
            parties: Vec::new(),
            backends: BTreeMap::new(),
            barrier_timeout_ms: None,
            connect_max_retries: 10,
            connect_initial_backoff_ms: 100,
            connect_max_backoff_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    /// Overlay environment variables on top of `self`.
    ///
    /// Environment variables:
    /// - `TRUSTFLOW_PARTY`: local party id
    /// - `TRUSTFLOW_BACKENDS`: comma-separated backends to enable locally
    /// - `TRUSTFLOW_SPARK_MASTER`: Spark master URL (enables Spark)
    /// - `TRUSTFLOW_JIFF_SERVER`: JIFF server URL (enables JIFF)
    /// - `TRUSTFLOW_BARRIER_TIMEOUT_MS`: barrier timeout in milliseconds
    /// - `TRUSTFLOW_CONNECT_MAX_RETRIES`: connect attempts before giving up
    pub fn with_env(mut self) -> Self {
        if let Ok(s) = std::env::var("TRUSTFLOW_PARTY") {
            if let Ok(v) = s.parse::<u64>() {
                self.local = PartyId::new(v);
            }
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_BACKENDS") {
            for name in s.split(',').filter(|n| !n.trim().is_empty()) {
                if let Ok(kind) = name.parse::<BackendKind>() {
                    self.backends.entry(kind).or_default();
                }
            }
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_SPARK_MASTER") {
            self.backends.entry(BackendKind::Spark).or_default().endpoint = Some(s);
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_JIFF_SERVER") {
            self.backends.entry(BackendKind::Jiff).or_default().endpoint = Some(s);
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_BARRIER_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                self.barrier_timeout_ms = Some(v);
            }
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_CONNECT_MAX_RETRIES") {
            if let Ok(v) = s.parse::<usize>() {
                self.connect_max_retries = v;
            }
        }

        self
    }

    /// Create a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn address_of(&self, party: PartyId) -> Option<&PartyAddr> {
        self.parties.iter().find(|p| p.id == party)
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&BackendSettings> {
        self.backends.get(&kind)
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff before connect attempt `attempt` (0-based), doubling up to the cap.
    pub fn connect_backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .connect_initial_backoff_ms
            .saturating_mul(factor)
            .min(self.connect_max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for p in &self.parties {
            if !seen.insert(p.id) {
                return Err(Error::Config(format!("party {} listed twice", p.id)));
            }
        }
        if !self.parties.is_empty() && !seen.contains(&self.local) {
            return Err(Error::Config(format!(
                "local party {} missing from the address book",
                self.local
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Root under which each job gets its code directory.
    pub code_root: String,

    /// Backends the planner must not assign.
    pub disabled_backends: BTreeSet<BackendKind>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            code_root: "/tmp/trustflow".to_string(),
            disabled_backends: BTreeSet::new(),
        }
    }
}

impl PlannerConfig {
    /// Overlay environment variables on top of `self`.
    ///
    /// Environment variables:
    /// - `TRUSTFLOW_CODE_ROOT`: root directory for generated job code
    /// - `TRUSTFLOW_DISABLED_BACKENDS`: comma-separated backends to avoid
    pub fn with_env(mut self) -> Self {
        if let Ok(s) = std::env::var("TRUSTFLOW_CODE_ROOT") {
            self.code_root = s;
        }

        if let Ok(s) = std::env::var("TRUSTFLOW_DISABLED_BACKENDS") {
            self.disabled_backends = s
                .split(',')
                .filter_map(|n| n.parse::<BackendKind>().ok())
                .collect();
        }

        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env()
    }
}
