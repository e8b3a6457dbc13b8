//! Walk a plan on one peer, strictly in order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trustflow_core::config::DispatchConfig;
use trustflow_core::id::PartyId;
use trustflow_planner::job::Job;
use trustflow_planner::plan::Plan;

use crate::backend::Backend;
use crate::binding;
use crate::error::DispatchError;
use crate::peer::Peer;

type Binder = dyn Fn(&Job, PartyId, &DispatchConfig) -> Option<Arc<dyn Backend>> + Send + Sync;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<String>,
    /// Jobs without the local party.
    pub skipped: Vec<String>,
    /// Jobs whose backend is not configured on this peer.
    pub unconfigured: Vec<String>,
}

pub struct Runner {
    peer: Peer,
    config: DispatchConfig,
    cancel: CancellationToken,
    binder: Box<Binder>,
}

impl Runner {
    pub fn new(peer: Peer, config: DispatchConfig) -> Self {
        Self {
            peer,
            config,
            cancel: CancellationToken::new(),
            binder: Box::new(binding::bind),
        }
    }

    /// Replace the job → backend mapping (tests, embedding).
    pub fn with_binder<F>(mut self, binder: F) -> Self
    where
        F: Fn(&Job, PartyId, &DispatchConfig) -> Option<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.binder = Box::new(binder);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Dispatch every job of `plan` this party takes part in. Job k+1 starts
    /// only after job k's barrier resolved; the first failure stops the run.
    pub async fn run(&mut self, plan: &Plan) -> Result<RunReport, DispatchError> {
        let local = self.peer.local();
        let jobs = plan.for_party(local);
        info!(party = %local, jobs = jobs.len(), digest = %plan.digest.short(), "starting plan");

        self.peer.schedule(jobs.iter().filter(|j| !j.skip));

        let mut report = RunReport::default();
        for job in &jobs {
            if job.skip {
                report.skipped.push(job.name.clone());
                continue;
            }
            let Some(backend) = (self.binder)(job, local, &self.config) else {
                warn!(party = %local, job = %job.name, backend = %job.backend, "backend not configured, skipping job");
                self.peer.decline(job, "backend not configured");
                report.unconfigured.push(job.name.clone());
                continue;
            };
            self.peer.dispatch(job, backend, &self.cancel).await?;
            report.completed.push(job.name.clone());
        }

        info!(
            party = %local,
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            unconfigured = report.unconfigured.len(),
            "plan finished"
        );
        Ok(report)
    }
}
