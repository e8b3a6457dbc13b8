//! Backends run a job's generated artifact. Calls are blocking; the peer
//! moves them onto the blocking pool.

use std::path::Path;
use std::process::Command;

use tracing::debug;
use trustflow_planner::job::Job;

use crate::error::BackendError;

pub trait Backend: Send + Sync {
    /// Prepare the artifact (compile, fetch dependencies, ...).
    fn setup(&self, job: &Job) -> Result<(), BackendError>;

    /// Run the artifact to completion.
    fn execute(&self, job: &Job) -> Result<(), BackendError>;
}

/// One external command, run inside the job's code directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn run(&self, cwd: &Path) -> Result<(), BackendError> {
        debug!(program = %self.program, args = ?self.args, cwd = %cwd.display(), "spawning");
        let status = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .status()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Runs an optional setup command and an execute command in `code_dir`.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    setup: Option<Invocation>,
    execute: Invocation,
}

impl ProcessBackend {
    pub fn new(setup: Option<Invocation>, execute: Invocation) -> Self {
        Self { setup, execute }
    }

    /// `<program> bash.sh build` then `<program> bash.sh`.
    pub fn script(program: &str, env: &[(String, String)]) -> Self {
        let with_env = |mut inv: Invocation| {
            inv.env.extend(env.iter().cloned());
            inv
        };
        Self {
            setup: Some(with_env(Invocation::new(program, ["bash.sh", "build"]))),
            execute: with_env(Invocation::new(program, ["bash.sh"])),
        }
    }

    pub fn setup_invocation(&self) -> Option<&Invocation> {
        self.setup.as_ref()
    }

    pub fn execute_invocation(&self) -> &Invocation {
        &self.execute
    }
}

impl Backend for ProcessBackend {
    fn setup(&self, job: &Job) -> Result<(), BackendError> {
        match &self.setup {
            Some(inv) => inv.run(Path::new(&job.code_dir)),
            None => Ok(()),
        }
    }

    fn execute(&self, job: &Job) -> Result<(), BackendError> {
        self.execute.run(Path::new(&job.code_dir))
    }
}

/// For parties that provide input to a job but do not compute it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl Backend for NoopBackend {
    fn setup(&self, _job: &Job) -> Result<(), BackendError> {
        Ok(())
    }

    fn execute(&self, _job: &Job) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;

    use trustflow_core::config::BackendKind;
    use trustflow_core::id::PartyId;
    use trustflow_planner::job::JobDetail;

    use super::*;

    fn job_in(dir: &Path) -> Job {
        Job {
            name: "job-0-motion".into(),
            code_dir: dir.display().to_string(),
            backend: BackendKind::Motion,
            input_parties: BTreeSet::from([PartyId::new(1), PartyId::new(2)]),
            skip: false,
            ops: Vec::new(),
            detail: JobDetail::Motion,
        }
    }

    #[test]
    fn script_runs_build_then_execute_in_code_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bash.sh"),
            "if [ \"$1\" = build ]; then echo built > built.txt; else echo \"$ROLE\" > ran.txt; fi\n",
        )
        .unwrap();
        let backend = ProcessBackend::script("bash", &[("ROLE".into(), "p1".into())]);
        let job = job_in(dir.path());

        backend.setup(&job).unwrap();
        assert!(dir.path().join("built.txt").exists());
        backend.execute(&job).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("ran.txt")).unwrap().trim(),
            "p1"
        );
    }

    #[test]
    fn non_zero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bash.sh"), "exit 3\n").unwrap();
        let backend = ProcessBackend::script("bash", &[]);
        let err = backend.execute(&job_in(dir.path())).unwrap_err();
        assert!(matches!(err, BackendError::Failed { .. }));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new(
            None,
            Invocation::new("trustflow-definitely-not-installed", ["x"]),
        );
        let err = backend.execute(&job_in(dir.path())).unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }
}
