//! Jobs: the unit of backend execution produced by the partitioner.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use trustflow_core::config::BackendKind;
use trustflow_core::id::{NodeId, PartyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Leave the producing job's representation (reveal, export or reshare).
    Close,
    /// Enter the consuming job's representation (load or share).
    Open,
}

/// Operator inserted where a relation crosses from one job to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub kind: BoundaryKind,
    /// Node whose output relation crosses.
    pub producer: NodeId,
    pub relation: String,
    /// The job on the other side of the crossing.
    pub counterpart: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedOp {
    Node(NodeId),
    Boundary(Boundary),
}

/// Backend-specific bits a job carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum JobDetail {
    Sharemind {
        controller: PartyId,
    },
    Spark,
    Python,
    SingleParty {
        framework: String,
        compute_party: PartyId,
    },
    Jiff,
    OblivC {
        submit_party: PartyId,
        evaluator_party: PartyId,
    },
    Motion,
}

impl JobDetail {
    pub fn kind(&self) -> BackendKind {
        match self {
            JobDetail::Sharemind { .. } => BackendKind::Sharemind,
            JobDetail::Spark => BackendKind::Spark,
            JobDetail::Python => BackendKind::Python,
            JobDetail::SingleParty { .. } => BackendKind::SingleParty,
            JobDetail::Jiff => BackendKind::Jiff,
            JobDetail::OblivC { .. } => BackendKind::OblivC,
            JobDetail::Motion => BackendKind::Motion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    /// Where the generated artifact for this job lives.
    pub code_dir: String,
    pub backend: BackendKind,
    pub input_parties: BTreeSet<PartyId>,
    /// Set only by `localized`: the local party has no part in this job.
    pub skip: bool,
    pub ops: Vec<PlannedOp>,
    pub detail: JobDetail,
}

impl Job {
    /// Copy of this job as seen by `local`.
    pub fn localized(&self, local: PartyId) -> Job {
        Job {
            skip: !self.input_parties.contains(&local),
            ..self.clone()
        }
    }

    /// Original DAG nodes hosted by this job, in placement order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ops.iter().filter_map(|op| match op {
            PlannedOp::Node(id) => Some(*id),
            PlannedOp::Boundary(_) => None,
        })
    }

    pub fn boundaries(&self) -> impl Iterator<Item = &Boundary> + '_ {
        self.ops.iter().filter_map(|op| match op {
            PlannedOp::Boundary(b) => Some(b),
            PlannedOp::Node(_) => None,
        })
    }

    /// Co-participants of `local`: the parties whose completion it waits for.
    pub fn others(&self, local: PartyId) -> BTreeSet<PartyId> {
        self.input_parties
            .iter()
            .copied()
            .filter(|p| *p != local)
            .collect()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parties = self
            .input_parties
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{} [{}] {{{}}}", self.name, self.backend, parties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            name: "job-0-obliv-c".into(),
            code_dir: "/tmp/job-0-obliv-c".into(),
            backend: BackendKind::OblivC,
            input_parties: [PartyId::new(1), PartyId::new(2)].into_iter().collect(),
            skip: false,
            ops: vec![
                PlannedOp::Node(NodeId::new(2)),
                PlannedOp::Boundary(Boundary {
                    kind: BoundaryKind::Close,
                    producer: NodeId::new(2),
                    relation: "joined".into(),
                    counterpart: "job-1-python".into(),
                }),
            ],
            detail: JobDetail::OblivC {
                submit_party: PartyId::new(1),
                evaluator_party: PartyId::new(2),
            },
        }
    }

    #[test]
    fn localized_sets_skip_for_outsiders_only() {
        let j = job();
        assert!(!j.localized(PartyId::new(1)).skip);
        assert!(j.localized(PartyId::new(3)).skip);
        assert!(!j.skip);
    }

    #[test]
    fn others_excludes_local() {
        let j = job();
        assert_eq!(
            j.others(PartyId::new(1)),
            [PartyId::new(2)].into_iter().collect()
        );
        assert_eq!(j.nodes().collect::<Vec<_>>(), vec![NodeId::new(2)]);
        assert_eq!(j.boundaries().count(), 1);
        assert_eq!(j.detail.kind(), j.backend);
    }
}
