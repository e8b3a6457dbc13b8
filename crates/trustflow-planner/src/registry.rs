//! Data-driven table of what each backend can run.
//!
//! The partitioner never matches on `BackendKind` to decide placement; it asks
//! the registry (through a `BackendPolicy`) which backends can host a
//! `Requirement`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use trustflow_core::config::BackendKind;
use trustflow_core::dag::{OpNode, OpTag};
use trustflow_core::id::PartyId;

/// What a group of nodes needs from the backend that runs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub mpc: bool,
    pub parties: BTreeSet<PartyId>,
    pub ops: BTreeSet<OpTag>,
    /// Parties allowed to see every input and output in the clear.
    pub trusted: BTreeSet<PartyId>,
}

impl Requirement {
    /// Requirement of a single node, evaluated against its parents' relations.
    pub fn of(node: &OpNode, parents: &[&OpNode]) -> Self {
        let mut trusted = node.out_rel().visibility();
        for p in parents {
            let vis = p.out_rel().visibility();
            trusted.retain(|q| vis.contains(q));
        }
        Self {
            mpc: node.is_mpc(),
            parties: node.out_rel().stored_with.clone(),
            ops: [node.op().tag()].into_iter().collect(),
            trusted,
        }
    }

    /// The (is_mpc, parties) pair two nodes must share to live in one job.
    pub fn signature(&self) -> (bool, &BTreeSet<PartyId>) {
        (self.mpc, &self.parties)
    }

    /// Requirement of running `self` and `other` in the same job.
    pub fn merged(&self, other: &Requirement) -> Requirement {
        Requirement {
            mpc: self.mpc,
            parties: self.parties.union(&other.parties).copied().collect(),
            ops: self.ops.union(&other.ops).copied().collect(),
            trusted: self.trusted.intersection(&other.trusted).copied().collect(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parties = self
            .parties
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let ops = self
            .ops
            .iter()
            .map(|o| format!("{o:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{} over {{{parties}}} running [{ops}]",
            if self.mpc { "mpc" } else { "local" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    /// Runs over secret-shared data (true) or in the clear at one party (false).
    pub mpc: bool,
    pub ops: BTreeSet<OpTag>,
    pub min_parties: usize,
    pub max_parties: Option<usize>,
    /// Delegated execution: one input party computes for everyone, so it
    /// must be trusted with all the data.
    #[serde(default)]
    pub needs_trusted_party: bool,
    /// Relative cost; lower is preferred by the default policy.
    pub cost: u32,
}

impl BackendDescriptor {
    pub fn supports(&self, req: &Requirement) -> bool {
        let n = req.parties.len();
        self.mpc == req.mpc
            && n >= self.min_parties
            && self.max_parties.map_or(true, |max| n <= max)
            && req.ops.is_subset(&self.ops)
            && (!self.needs_trusted_party || req.parties.iter().any(|p| req.trusted.contains(p)))
    }
}

fn tags(list: &[OpTag]) -> BTreeSet<OpTag> {
    list.iter().copied().collect()
}

/// Operators every backend can express on data in its own representation.
const BASIC: &[OpTag] = &[
    OpTag::Create,
    OpTag::Open,
    OpTag::Close,
    OpTag::Aggregate,
    OpTag::Join,
    OpTag::Filter,
    OpTag::Project,
    OpTag::Multiply,
    OpTag::Divide,
    OpTag::Concat,
    OpTag::Store,
    OpTag::Persist,
];

/// Operators only a general-purpose local engine (or a full MPC stack) offers.
const EXTENDED: &[OpTag] = &[
    OpTag::IndexAggregate,
    OpTag::IndexJoin,
    OpTag::FilterBy,
    OpTag::Index,
    OpTag::ConcatCols,
    OpTag::DistinctCount,
    OpTag::Shuffle,
    OpTag::Union,
    OpTag::Distinct,
];

const PUBLIC_KEYS: &[OpTag] = &[OpTag::PubJoin, OpTag::PubIntersect];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRegistry {
    entries: Vec<BackendDescriptor>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let basic = tags(BASIC);
        let full: BTreeSet<OpTag> = BASIC.iter().chain(EXTENDED).copied().collect();
        let with_public: BTreeSet<OpTag> = full.iter().chain(PUBLIC_KEYS).copied().collect();
        let local = |kind, cost| BackendDescriptor {
            kind,
            mpc: false,
            ops: full.clone(),
            min_parties: 1,
            max_parties: Some(1),
            needs_trusted_party: false,
            cost,
        };

        Self {
            entries: vec![
                local(BackendKind::Python, 1),
                local(BackendKind::Spark, 2),
                BackendDescriptor {
                    kind: BackendKind::SingleParty,
                    mpc: true,
                    ops: full.clone(),
                    min_parties: 2,
                    max_parties: None,
                    needs_trusted_party: true,
                    cost: 5,
                },
                BackendDescriptor {
                    kind: BackendKind::OblivC,
                    mpc: true,
                    ops: basic.clone(),
                    min_parties: 2,
                    max_parties: Some(2),
                    needs_trusted_party: false,
                    cost: 20,
                },
                BackendDescriptor {
                    kind: BackendKind::Motion,
                    mpc: true,
                    ops: basic,
                    min_parties: 2,
                    max_parties: None,
                    needs_trusted_party: false,
                    cost: 25,
                },
                BackendDescriptor {
                    kind: BackendKind::Sharemind,
                    mpc: true,
                    ops: full,
                    min_parties: 3,
                    max_parties: Some(3),
                    needs_trusted_party: false,
                    cost: 30,
                },
                BackendDescriptor {
                    kind: BackendKind::Jiff,
                    mpc: true,
                    ops: with_public,
                    min_parties: 2,
                    max_parties: None,
                    needs_trusted_party: false,
                    cost: 40,
                },
            ],
        }
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add `desc`, replacing any entry of the same kind in place.
    pub fn register(&mut self, desc: BackendDescriptor) {
        match self.entries.iter_mut().find(|e| e.kind == desc.kind) {
            Some(slot) => *slot = desc,
            None => self.entries.push(desc),
        }
    }

    /// Drop the given kinds from the table.
    pub fn without(mut self, disabled: &BTreeSet<BackendKind>) -> Self {
        self.entries.retain(|e| !disabled.contains(&e.kind));
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&BackendDescriptor> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// All entries, in registration order.
    pub fn entries(&self) -> &[BackendDescriptor] {
        &self.entries
    }

    /// Entries able to host `req`, in registration order.
    pub fn capable<'a>(
        &'a self,
        req: &'a Requirement,
    ) -> impl Iterator<Item = &'a BackendDescriptor> + 'a {
        self.entries.iter().filter(move |e| e.supports(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(mpc: bool, parties: &[u64], ops: &[OpTag]) -> Requirement {
        Requirement {
            mpc,
            parties: parties.iter().map(|p| PartyId::new(*p)).collect(),
            ops: ops.iter().copied().collect(),
            trusted: BTreeSet::new(),
        }
    }

    fn kinds(reg: &BackendRegistry, r: &Requirement) -> Vec<BackendKind> {
        reg.capable(r).map(|d| d.kind).collect()
    }

    #[test]
    fn default_table_matches_party_counts() {
        let reg = BackendRegistry::default();
        assert_eq!(
            kinds(&reg, &req(false, &[1], &[OpTag::Join])),
            vec![BackendKind::Python, BackendKind::Spark]
        );
        assert_eq!(
            kinds(&reg, &req(true, &[1, 2], &[OpTag::Join])),
            vec![BackendKind::OblivC, BackendKind::Motion, BackendKind::Jiff]
        );
        assert_eq!(
            kinds(&reg, &req(true, &[1, 2, 3], &[OpTag::Shuffle])),
            vec![BackendKind::Sharemind, BackendKind::Jiff]
        );
        assert_eq!(
            kinds(&reg, &req(true, &[1, 2], &[OpTag::PubJoin])),
            vec![BackendKind::Jiff]
        );
    }

    #[test]
    fn delegated_backend_needs_a_trusted_input_party() {
        let reg = BackendRegistry::default();
        let mut r = req(true, &[1, 2], &[OpTag::Aggregate]);
        assert!(!reg.get(BackendKind::SingleParty).unwrap().supports(&r));
        r.trusted.insert(PartyId::new(2));
        assert!(reg.get(BackendKind::SingleParty).unwrap().supports(&r));
    }

    #[test]
    fn register_replaces_in_place_and_without_removes() {
        let mut reg = BackendRegistry::default();
        let mut py = reg.get(BackendKind::Python).unwrap().clone();
        py.cost = 100;
        reg.register(py);
        assert_eq!(reg.entries()[0].cost, 100);

        let reg = reg.without(&[BackendKind::Python].into_iter().collect());
        assert!(reg.get(BackendKind::Python).is_none());
        assert_eq!(reg.entries().len(), 6);
    }
}
