//! The immutable output of partitioning.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use trustflow_core::dag::Dag;
use trustflow_core::hash::{hash_serde, Hash256};
use trustflow_core::id::{NodeId, PartyId};

use crate::error::{PlanningError, Result};
use crate::job::{BoundaryKind, Job};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Jobs in execution order.
    pub jobs: Vec<Job>,
    /// blake3 over the job list; equal on every party for the same workflow.
    pub digest: Hash256,
}

impl Plan {
    pub fn new(jobs: Vec<Job>) -> Result<Self> {
        let digest = hash_serde(&jobs)?;
        Ok(Self { jobs, digest })
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// The plan as seen by `local`: every job, with `skip` set where `local`
    /// takes no part.
    pub fn for_party(&self, local: PartyId) -> Vec<Job> {
        self.jobs.iter().map(|j| j.localized(local)).collect()
    }

    /// Check the plan against the DAG it was cut from: every node hosted
    /// exactly once, edges never point backwards, and every crossing edge has
    /// its Close/Open pair (and no pair exists without a crossing).
    pub fn verify(&self, dag: &Dag) -> Result<()> {
        let bad = |msg: String| Err(PlanningError::Inconsistent(msg));

        // node -> (job index, position within job)
        let mut at: HashMap<NodeId, (usize, usize)> = HashMap::new();
        for (j, job) in self.jobs.iter().enumerate() {
            for (pos, id) in job.nodes().enumerate() {
                if at.insert(id, (j, pos)).is_some() {
                    return bad(format!("{id} is hosted more than once"));
                }
            }
        }
        for node in dag.nodes() {
            if !at.contains_key(&node.id()) {
                return bad(format!("'{}' is not hosted by any job", node.name()));
            }
        }
        if at.len() != dag.len() {
            return bad("plan hosts nodes outside the DAG".to_string());
        }

        let mut expected: BTreeSet<(usize, BoundaryKind, NodeId, String)> = BTreeSet::new();
        for (from, to) in dag.edges() {
            let (ju, pu) = at[&from];
            let (jv, pv) = at[&to];
            if ju > jv || (ju == jv && pu >= pv) {
                return bad(format!("edge {from} -> {to} runs against job order"));
            }
            if ju != jv {
                let (producer_job, consumer_job) = (&self.jobs[ju].name, &self.jobs[jv].name);
                expected.insert((ju, BoundaryKind::Close, from, consumer_job.clone()));
                expected.insert((jv, BoundaryKind::Open, from, producer_job.clone()));
            }
        }

        let mut found = BTreeSet::new();
        for (j, job) in self.jobs.iter().enumerate() {
            for b in job.boundaries() {
                found.insert((j, b.kind, b.producer, b.counterpart.clone()));
            }
        }
        if let Some(missing) = expected.difference(&found).next() {
            return bad(format!(
                "missing {:?} for {} in {}",
                missing.1, missing.2, self.jobs[missing.0].name
            ));
        }
        if let Some(extra) = found.difference(&expected).next() {
            return bad(format!(
                "spurious {:?} for {} in {}",
                extra.1, extra.2, self.jobs[extra.0].name
            ));
        }
        Ok(())
    }
}
