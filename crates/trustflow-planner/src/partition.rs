//! Cut an operator DAG into an ordered list of backend jobs.
//!
//! Nodes are visited in topological order. A node joins the open job when it
//! shares the job's (is_mpc, parties) signature and the grown operator set is
//! still hostable; otherwise the open job is closed and a new one starts.
//! Input relations (Create) have no representation of their own and ride
//! along with the job of their first consumer. Every edge that ends up
//! crossing two jobs gets a Close in the producer's job and an Open in the
//! consumer's job.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use trustflow_core::config::{BackendKind, PlannerConfig};
use trustflow_core::dag::{Dag, Op, OpTag};
use trustflow_core::id::{NodeId, PartyId};

use crate::error::{PlanningError, Result};
use crate::job::{Boundary, BoundaryKind, Job, JobDetail, PlannedOp};
use crate::plan::Plan;
use crate::policy::{BackendPolicy, CheapestCapable};
use crate::registry::{BackendRegistry, Requirement};

/// Framework a delegated (single-party) job runs with at the compute party.
const DELEGATED_FRAMEWORK: &str = "python";

pub struct Partitioner {
    registry: BackendRegistry,
    policy: Box<dyn BackendPolicy>,
    config: PlannerConfig,
}

impl Partitioner {
    pub fn new(config: PlannerConfig) -> Self {
        let registry = BackendRegistry::default().without(&config.disabled_backends);
        Self {
            registry,
            policy: Box::new(CheapestCapable),
            config,
        }
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry.without(&self.config.disabled_backends);
        self
    }

    pub fn with_policy(mut self, policy: impl BackendPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn partition(&self, dag: &Dag) -> Result<Plan> {
        check_disclosure(dag)?;
        let cut = self.cut(dag)?;
        let jobs = self.assemble(dag, cut)?;
        debug!(
            jobs = jobs.len(),
            nodes = dag.len(),
            policy = self.policy.name(),
            "partitioned workflow"
        );
        Plan::new(jobs)
    }

    fn hostable(&self, req: &Requirement) -> bool {
        self.policy.select(&self.registry, req).is_some()
    }

    fn cut(&self, dag: &Dag) -> Result<Cut> {
        let reqs = requirements(dag);
        let is_input = |id: NodeId| dag.node(id).is_some_and(|n| matches!(n.op(), Op::Create));

        let mut cut = Cut {
            drafts: Vec::new(),
            job_of: vec![None; dag.len()],
        };
        let mut open: Option<usize> = None;
        let mut dangling = Vec::new();
        let mut failure: Option<PlanningError> = None;

        dag.topo_sort_by(|ready, _| {
            if failure.is_some() {
                return None;
            }

            // Inputs are free to visit; they are placed with their first consumer.
            if let Some(&id) = ready.iter().find(|id| is_input(**id)) {
                if dag.node(id).is_some_and(|n| n.children().is_empty()) {
                    dangling.push(id);
                }
                return Some(id);
            }

            let candidate = |id: NodeId, job_of: &[Option<usize>]| {
                let mut req = reqs[id.get() as usize].clone();
                for p in unhosted_inputs(dag, id, job_of) {
                    host_input(&mut req, &reqs[p.get() as usize]);
                }
                req
            };

            // Prefer a ready node that extends the open job, then the lowest id.
            let extending = open.and_then(|j| {
                ready.iter().copied().find(|id| {
                    let draft = &cut.drafts[j];
                    let req = candidate(*id, &cut.job_of);
                    draft.req.signature() == req.signature()
                        && self.hostable(&draft.req.merged(&req))
                })
            });

            let (id, joins_open) = match extending {
                Some(id) => (id, true),
                None => (*ready.iter().next()?, false),
            };
            let req = candidate(id, &cut.job_of);
            let node_name = dag.node(id).map(|n| n.name().to_string()).unwrap_or_default();

            let j = match (joins_open, open) {
                (true, Some(j)) => {
                    cut.drafts[j].req = cut.drafts[j].req.merged(&req);
                    j
                }
                _ => {
                    if !self.hostable(&req) {
                        failure = Some(PlanningError::NoBackend {
                            node: node_name,
                            requirement: req.to_string(),
                        });
                        return None;
                    }
                    if let Some(prev) = open {
                        debug!(
                            job = prev,
                            next = %node_name,
                            "closing job at representation change"
                        );
                    }
                    cut.drafts.push(Draft {
                        nodes: Vec::new(),
                        req,
                    });
                    let j = cut.drafts.len() - 1;
                    open = Some(j);
                    j
                }
            };

            for p in unhosted_inputs(dag, id, &cut.job_of) {
                cut.place(p, j);
            }
            cut.place(id, j);
            Some(id)
        });

        if let Some(err) = failure {
            return Err(err);
        }

        for id in dangling {
            let req = reqs[id.get() as usize].clone();
            if !self.hostable(&req) {
                return Err(PlanningError::NoBackend {
                    node: dag.node(id).map(|n| n.name().to_string()).unwrap_or_default(),
                    requirement: req.to_string(),
                });
            }
            cut.drafts.push(Draft {
                nodes: Vec::new(),
                req,
            });
            let j = cut.drafts.len() - 1;
            cut.place(id, j);
        }

        Ok(cut)
    }

    fn assemble(&self, dag: &Dag, cut: Cut) -> Result<Vec<Job>> {
        let mut names = Vec::with_capacity(cut.drafts.len());
        let mut kinds = Vec::with_capacity(cut.drafts.len());
        for (i, draft) in cut.drafts.iter().enumerate() {
            let kind = self
                .policy
                .select(&self.registry, &draft.req)
                .ok_or_else(|| PlanningError::NoBackend {
                    node: draft
                        .nodes
                        .first()
                        .and_then(|id| dag.node(*id))
                        .map(|n| n.name().to_string())
                        .unwrap_or_default(),
                    requirement: draft.req.to_string(),
                })?;
            let name = format!("job-{i}-{kind}");
            debug!(job = %name, backend = %kind, nodes = draft.nodes.len(), "assigned backend");
            names.push(name);
            kinds.push(kind);
        }

        // (producer, consuming job) pairs; one Close/Open pair per relation per job.
        let mut crossings: BTreeSet<(NodeId, usize)> = BTreeSet::new();
        for (from, to) in dag.edges() {
            let (ju, jv) = (cut.job(from)?, cut.job(to)?);
            if ju != jv {
                crossings.insert((from, jv));
            }
        }

        let mut jobs = Vec::with_capacity(cut.drafts.len());
        for (j, draft) in cut.drafts.iter().enumerate() {
            let relation = |id: NodeId| dag.node(id).map(|n| n.name().to_string()).unwrap_or_default();
            let mut ops = Vec::new();

            for (producer, _) in crossings.iter().filter(|(_, jv)| *jv == j) {
                ops.push(PlannedOp::Boundary(Boundary {
                    kind: BoundaryKind::Open,
                    producer: *producer,
                    relation: relation(*producer),
                    counterpart: names[cut.job(*producer)?].clone(),
                }));
            }
            for id in &draft.nodes {
                ops.push(PlannedOp::Node(*id));
                for (_, jv) in crossings.range((*id, 0)..=(*id, usize::MAX)) {
                    ops.push(PlannedOp::Boundary(Boundary {
                        kind: BoundaryKind::Close,
                        producer: *id,
                        relation: relation(*id),
                        counterpart: names[*jv].clone(),
                    }));
                }
            }

            let input_parties: BTreeSet<PartyId> = draft
                .nodes
                .iter()
                .filter_map(|id| dag.node(*id))
                .flat_map(|n| n.out_rel().stored_with.iter().copied())
                .collect();
            let detail = detail_for(kinds[j], &input_parties, &draft.req).ok_or_else(|| {
                PlanningError::Inconsistent(format!("{} has no input parties", names[j]))
            })?;

            jobs.push(Job {
                name: names[j].clone(),
                code_dir: format!("{}/{}", self.config.code_root.trim_end_matches('/'), names[j]),
                backend: kinds[j],
                input_parties,
                skip: false,
                ops,
                detail,
            });
        }
        Ok(jobs)
    }
}

/// Partition `dag` with the default registry and policy.
pub fn partition(dag: &Dag, config: &PlannerConfig) -> Result<Plan> {
    Partitioner::new(config.clone()).partition(dag)
}

struct Draft {
    nodes: Vec<NodeId>,
    req: Requirement,
}

struct Cut {
    drafts: Vec<Draft>,
    job_of: Vec<Option<usize>>,
}

impl Cut {
    fn place(&mut self, id: NodeId, job: usize) {
        self.job_of[id.get() as usize] = Some(job);
        self.drafts[job].nodes.push(id);
    }

    fn job(&self, id: NodeId) -> Result<usize> {
        self.job_of
            .get(id.get() as usize)
            .copied()
            .flatten()
            .ok_or_else(|| PlanningError::Inconsistent(format!("{id} was never placed")))
    }
}

fn requirements(dag: &Dag) -> Vec<Requirement> {
    dag.nodes()
        .map(|n| {
            let parents: Vec<_> = n.parents().iter().filter_map(|p| dag.node(*p)).collect();
            Requirement::of(n, &parents)
        })
        .collect()
}

/// Input parents of `id` that no job hosts yet, deduplicated, in parent order.
fn unhosted_inputs(dag: &Dag, id: NodeId, job_of: &[Option<usize>]) -> Vec<NodeId> {
    let mut out = Vec::new();
    if let Some(node) = dag.node(id) {
        for p in node.parents() {
            let input = dag.node(*p).is_some_and(|n| matches!(n.op(), Op::Create));
            if input && job_of[p.get() as usize].is_none() && !out.contains(p) {
                out.push(*p);
            }
        }
    }
    out
}

fn host_input(req: &mut Requirement, input: &Requirement) {
    req.ops.insert(OpTag::Create);
    req.trusted.retain(|p| input.trusted.contains(p));
}

fn detail_for(
    kind: BackendKind,
    parties: &BTreeSet<PartyId>,
    req: &Requirement,
) -> Option<JobDetail> {
    let mut iter = parties.iter().copied();
    let first = iter.next()?;
    Some(match kind {
        BackendKind::Python => JobDetail::Python,
        BackendKind::Spark => JobDetail::Spark,
        BackendKind::Jiff => JobDetail::Jiff,
        BackendKind::Motion => JobDetail::Motion,
        BackendKind::Sharemind => JobDetail::Sharemind { controller: first },
        BackendKind::OblivC => JobDetail::OblivC {
            submit_party: first,
            evaluator_party: iter.next().unwrap_or(first),
        },
        BackendKind::SingleParty => JobDetail::SingleParty {
            framework: DELEGATED_FRAMEWORK.to_string(),
            compute_party: parties
                .iter()
                .copied()
                .find(|p| req.trusted.contains(p))
                .unwrap_or(first),
        },
    })
}

/// Reject edges that would hand a relation to a party not allowed to see it.
fn check_disclosure(dag: &Dag) -> Result<()> {
    for node in dag.nodes() {
        let holders = &node.out_rel().stored_with;
        if holders.len() != 1 || node.op().is_release() {
            continue;
        }
        let Some(&q) = holders.iter().next() else {
            continue;
        };
        for p in node.parents() {
            let Some(parent) = dag.node(*p) else { continue };
            let rel = parent.out_rel();
            if rel.stored_with == *holders {
                continue;
            }
            if !rel.visibility().contains(&q) {
                return Err(PlanningError::Disclosure {
                    node: node.name().to_string(),
                    party: q,
                    relation: rel.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Jobs grouped by backend, for summaries.
pub fn backend_histogram(plan: &Plan) -> BTreeMap<BackendKind, usize> {
    let mut out = BTreeMap::new();
    for job in &plan.jobs {
        *out.entry(job.backend).or_insert(0) += 1;
    }
    out
}
