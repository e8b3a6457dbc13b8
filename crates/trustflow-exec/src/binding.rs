//! Map a planned job to the backend this peer runs it with.

use std::sync::Arc;

use trustflow_core::config::{BackendSettings, DispatchConfig};
use trustflow_core::id::PartyId;
use trustflow_planner::job::{Job, JobDetail};

use crate::backend::{Backend, Invocation, NoopBackend, ProcessBackend};

const PYTHON: &str = "python";
const SPARK_SUBMIT: &str = "spark-submit";
const SHELL: &str = "bash";
const ENTRY_POINT: &str = "workflow.py";

/// Backend for `job` at `local`, or `None` when `local` takes no part in the
/// job or the job's backend is not configured on this peer.
pub fn bind(job: &Job, local: PartyId, cfg: &DispatchConfig) -> Option<Arc<dyn Backend>> {
    if !job.input_parties.contains(&local) {
        return None;
    }
    let settings = cfg.backend(job.backend)?;
    let program = |default: &str| settings.program.clone().unwrap_or_else(|| default.to_string());
    let env = job_env(job, local, settings);

    let backend: Arc<dyn Backend> = match &job.detail {
        JobDetail::Python => Arc::new(python(program(PYTHON), &env)),
        JobDetail::Spark => {
            let master = settings.endpoint.as_ref()?;
            let mut inv = Invocation::new(
                program(SPARK_SUBMIT),
                ["--master", master.as_str(), ENTRY_POINT],
            );
            inv.env.extend(env);
            Arc::new(ProcessBackend::new(None, inv))
        }
        JobDetail::SingleParty { compute_party, .. } => {
            if *compute_party == local {
                Arc::new(python(program(PYTHON), &env))
            } else {
                Arc::new(NoopBackend)
            }
        }
        JobDetail::Sharemind { controller } => {
            if *controller == local {
                Arc::new(ProcessBackend::script(&program(SHELL), &env))
            } else {
                Arc::new(NoopBackend)
            }
        }
        JobDetail::OblivC { .. } | JobDetail::Motion | JobDetail::Jiff => {
            Arc::new(ProcessBackend::script(&program(SHELL), &env))
        }
    };
    Some(backend)
}

fn python(program: String, env: &[(String, String)]) -> ProcessBackend {
    let mut inv = Invocation::new(program, [ENTRY_POINT]);
    inv.env.extend(env.iter().cloned());
    ProcessBackend::new(None, inv)
}

fn job_env(job: &Job, local: PartyId, settings: &BackendSettings) -> Vec<(String, String)> {
    let mut env = vec![
        ("TRUSTFLOW_PARTY".to_string(), local.get().to_string()),
        ("TRUSTFLOW_JOB".to_string(), job.name.clone()),
    ];
    match &job.detail {
        JobDetail::Jiff => {
            if let Some(url) = &settings.endpoint {
                env.push(("JIFF_SERVER_URL".to_string(), url.clone()));
            }
        }
        JobDetail::OblivC {
            submit_party,
            evaluator_party,
        } => {
            let role = if *submit_party == local {
                "submit"
            } else if *evaluator_party == local {
                "evaluate"
            } else {
                "input"
            };
            env.push(("OBLIVC_ROLE".to_string(), role.to_string()));
        }
        _ => {}
    }
    env
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use trustflow_core::config::BackendKind;

    use super::*;

    fn job(detail: JobDetail, parties: &[u64]) -> Job {
        Job {
            name: "job-0".into(),
            code_dir: "/tmp/job-0".into(),
            backend: detail.kind(),
            input_parties: parties.iter().map(|p| PartyId::new(*p)).collect::<BTreeSet<_>>(),
            skip: false,
            ops: Vec::new(),
            detail,
        }
    }

    fn cfg(kinds: &[(BackendKind, Option<&str>)]) -> DispatchConfig {
        DispatchConfig {
            backends: kinds
                .iter()
                .map(|(k, endpoint)| {
                    (
                        *k,
                        BackendSettings {
                            program: None,
                            endpoint: endpoint.map(str::to_string),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn outsiders_and_unconfigured_backends_bind_nothing() {
        let j = job(JobDetail::Python, &[1]);
        let c = cfg(&[(BackendKind::Python, None)]);
        assert!(bind(&j, PartyId::new(1), &c).is_some());
        assert!(bind(&j, PartyId::new(2), &c).is_none());
        assert!(bind(&j, PartyId::new(1), &cfg(&[])).is_none());
    }

    #[test]
    fn spark_needs_a_master_url() {
        let j = job(JobDetail::Spark, &[1]);
        assert!(bind(&j, PartyId::new(1), &cfg(&[(BackendKind::Spark, None)])).is_none());
        assert!(bind(
            &j,
            PartyId::new(1),
            &cfg(&[(BackendKind::Spark, Some("spark://master:7077"))])
        )
        .is_some());
    }

    #[test]
    fn jiff_gets_its_server_url() {
        let j = job(JobDetail::Jiff, &[1, 2]);
        let settings = BackendSettings {
            program: None,
            endpoint: Some("http://jiff:9000".into()),
        };
        let env = job_env(&j, PartyId::new(2), &settings);
        assert!(env.contains(&("JIFF_SERVER_URL".to_string(), "http://jiff:9000".to_string())));
        assert!(env.contains(&("TRUSTFLOW_PARTY".to_string(), "2".to_string())));
    }

    #[test]
    fn oblivc_roles_follow_party_assignment() {
        let j = job(
            JobDetail::OblivC {
                submit_party: PartyId::new(1),
                evaluator_party: PartyId::new(2),
            },
            &[1, 2],
        );
        let env = job_env(&j, PartyId::new(2), &BackendSettings::default());
        assert!(env.contains(&("OBLIVC_ROLE".to_string(), "evaluate".to_string())));
    }
}
