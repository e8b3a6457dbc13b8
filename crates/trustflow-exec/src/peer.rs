//! A party's peer: dispatcher slot, inbox handling and the per-job protocol.
//!
//! Per job: register → setup → execute → broadcast → arm waits → barrier →
//! unregister. The slot is claimed at register and released on every exit
//! path. While a backend call runs on the blocking pool the inbox keeps being
//! drained into the active barrier.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trustflow_core::id::PartyId;
use trustflow_planner::job::Job;

use crate::backend::Backend;
use crate::barrier::{Barrier, BarrierOutcome};
use crate::error::{BackendError, DispatchError, ProtocolError, TransportError};
use crate::message::{Completion, Phase, Status};
use crate::transport::{Inbox, Transport};

#[derive(Debug)]
pub struct ActiveJob {
    pub job: String,
    pub barrier: Barrier,
}

#[derive(Debug, Default)]
pub enum PeerState {
    #[default]
    Idle,
    Dispatching(ActiveJob),
}

pub struct Peer {
    local: PartyId,
    state: PeerState,
    transport: Arc<dyn Transport>,
    inbox: Inbox,
    inbox_open: bool,
    /// Jobs this peer will dispatch later, with their input parties.
    scheduled: BTreeMap<String, BTreeSet<PartyId>>,
    /// Frames for scheduled jobs that arrived before the job started.
    backlog: BTreeMap<String, Vec<Completion>>,
    finished: BTreeSet<String>,
    barrier_timeout: Option<Duration>,
}

impl Peer {
    pub fn new(local: PartyId, transport: Arc<dyn Transport>, inbox: Inbox) -> Self {
        Self {
            local,
            state: PeerState::Idle,
            transport,
            inbox,
            inbox_open: true,
            scheduled: BTreeMap::new(),
            backlog: BTreeMap::new(),
            finished: BTreeSet::new(),
            barrier_timeout: None,
        }
    }

    pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn local(&self) -> PartyId {
        self.local
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, PeerState::Idle)
    }

    pub fn backlog_len(&self, job: &str) -> usize {
        self.backlog.get(job).map_or(0, Vec::len)
    }

    /// Announce jobs this peer will take part in, so early frames for them are
    /// kept instead of rejected.
    pub fn schedule<'a>(&mut self, jobs: impl IntoIterator<Item = &'a Job>) {
        for job in jobs {
            if job.input_parties.contains(&self.local) && !self.finished.contains(&job.name) {
                self.scheduled
                    .insert(job.name.clone(), job.input_parties.clone());
            }
        }
    }

    /// Drop a scheduled job without running it; later frames for it are stale.
    pub fn forget(&mut self, job: &str) {
        self.scheduled.remove(job);
        self.backlog.remove(job);
        self.finished.insert(job.to_string());
    }

    /// Refuse a scheduled job: tell its co-participants it failed at
    /// register, then forget it.
    pub fn decline(&mut self, job: &Job, reason: &str) {
        let status = Status::Failed {
            phase: Phase::Register,
            reason: reason.to_string(),
        };
        if let Err(e) = self.broadcast(job, status) {
            warn!(party = %self.local, job = %job.name, error = %e, "could not report declined job");
        }
        self.forget(&job.name);
    }

    /// File one incoming frame.
    pub fn receive(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let c = Completion::decode(frame)?;
        if c.sender == self.local {
            return Err(ProtocolError::UnexpectedSender {
                sender: c.sender,
                job: c.job,
            });
        }

        if let PeerState::Dispatching(active) = &mut self.state {
            if active.job == c.job {
                return active.barrier.file(c);
            }
        }

        if self.finished.contains(&c.job) {
            return Err(ProtocolError::Stale {
                sender: c.sender,
                job: c.job,
            });
        }

        let Some(parties) = self.scheduled.get(&c.job) else {
            return Err(ProtocolError::UnknownJob {
                sender: c.sender,
                job: c.job,
            });
        };
        if !parties.contains(&c.sender) {
            return Err(ProtocolError::UnexpectedSender {
                sender: c.sender,
                job: c.job,
            });
        }
        let queued = self.backlog.entry(c.job.clone()).or_default();
        if queued.iter().any(|q| q.sender == c.sender) {
            return Err(ProtocolError::Duplicate {
                sender: c.sender,
                job: c.job,
            });
        }
        queued.push(c);
        Ok(())
    }

    /// `receive`, logging and dropping rejected frames.
    fn handle(&mut self, frame: Vec<u8>) {
        if let Err(e) = self.receive(&frame) {
            warn!(party = %self.local, error = %e, "dropping frame");
        }
    }

    /// Run one job through the full protocol.
    pub async fn dispatch(
        &mut self,
        job: &Job,
        backend: Arc<dyn Backend>,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        self.register(job)?;
        let result = self.drive(job, backend, cancel).await;
        self.unregister(&job.name);
        match &result {
            Ok(()) => info!(party = %self.local, job = %job.name, "job complete"),
            Err(e) => error!(party = %self.local, job = %job.name, phase = %e.phase(), error = %e, "job failed"),
        }
        result
    }

    fn register(&mut self, job: &Job) -> Result<(), DispatchError> {
        if let PeerState::Dispatching(active) = &self.state {
            return Err(DispatchError::Busy {
                party: self.local,
                job: job.name.clone(),
                active: active.job.clone(),
            });
        }

        self.scheduled
            .insert(job.name.clone(), job.input_parties.clone());
        let mut barrier = Barrier::new(job.name.clone(), job.others(self.local));
        for c in self.backlog.remove(&job.name).unwrap_or_default() {
            if let Err(e) = barrier.file(c) {
                warn!(party = %self.local, job = %job.name, error = %e, "dropping queued frame");
            }
        }
        debug!(
            party = %self.local,
            job = %job.name,
            early = barrier.early_len(),
            phase = %Phase::Register,
            "registered"
        );
        self.state = PeerState::Dispatching(ActiveJob {
            job: job.name.clone(),
            barrier,
        });
        Ok(())
    }

    fn unregister(&mut self, job: &str) {
        self.state = PeerState::Idle;
        self.scheduled.remove(job);
        self.backlog.remove(job);
        self.finished.insert(job.to_string());
    }

    async fn drive(
        &mut self,
        job: &Job,
        backend: Arc<dyn Backend>,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        for phase in [Phase::Setup, Phase::Execute] {
            info!(party = %self.local, job = %job.name, %phase, "running backend");
            if let Err(source) = self.run_backend(job, backend.clone(), phase, cancel).await? {
                let reason = source.to_string();
                if let Err(e) = self.broadcast(job, Status::Failed { phase, reason }) {
                    warn!(party = %self.local, job = %job.name, error = %e, "could not report failure");
                }
                let (party, name) = (self.local, job.name.clone());
                return Err(match phase {
                    Phase::Setup => DispatchError::Setup {
                        party,
                        job: name,
                        source,
                    },
                    _ => DispatchError::Execute {
                        party,
                        job: name,
                        source,
                    },
                });
            }
        }

        info!(party = %self.local, job = %job.name, phase = %Phase::Broadcast, "notifying co-participants");
        self.broadcast(job, Status::Done)?;

        self.await_barrier(job, cancel).await
    }

    /// Run one blocking backend call while draining the inbox. The outer
    /// result carries protocol failures, the inner one the backend's own.
    async fn run_backend(
        &mut self,
        job: &Job,
        backend: Arc<dyn Backend>,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<Result<(), BackendError>, DispatchError> {
        let owned = job.clone();
        let mut call = tokio::task::spawn_blocking(move || match phase {
            Phase::Setup => backend.setup(&owned),
            _ => backend.execute(&owned),
        });

        loop {
            tokio::select! {
                joined = &mut call => {
                    return Ok(joined.unwrap_or_else(|e| Err(BackendError::Aborted(e.to_string()))));
                }
                _ = cancel.cancelled() => {
                    let reason = "cancelled".to_string();
                    if let Err(e) = self.broadcast(job, Status::Failed { phase, reason }) {
                        warn!(party = %self.local, job = %job.name, error = %e, "could not report cancellation");
                    }
                    return Err(DispatchError::Cancelled {
                        party: self.local,
                        job: job.name.clone(),
                        phase,
                    });
                }
                frame = self.inbox.recv(), if self.inbox_open => match frame {
                    Some(frame) => self.handle(frame),
                    None => self.inbox_open = false,
                },
            }
        }
    }

    fn broadcast(&self, job: &Job, status: Status) -> Result<(), DispatchError> {
        let failed = |source: TransportError| DispatchError::Transport {
            party: self.local,
            job: job.name.clone(),
            phase: Phase::Broadcast,
            source,
        };
        let frame = Completion {
            sender: self.local,
            job: job.name.clone(),
            status,
        }
        .encode()
        .map_err(failed)?;

        for to in job.others(self.local) {
            match self.transport.send(to, frame.clone()) {
                Ok(()) => debug!(party = %self.local, job = %job.name, %to, "sent completion"),
                Err(e @ TransportError::UnknownParty(_)) => return Err(failed(e)),
                Err(e) => warn!(party = %self.local, job = %job.name, %to, error = %e, "completion not delivered"),
            }
        }
        Ok(())
    }

    async fn await_barrier(
        &mut self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        if let PeerState::Dispatching(active) = &mut self.state {
            active.barrier.arm();
        }
        let deadline = self.barrier_timeout.map(|t| Instant::now() + t);
        info!(party = %self.local, job = %job.name, phase = %Phase::Barrier, "waiting for co-participants");

        loop {
            let (outcome, missing) = match &self.state {
                PeerState::Dispatching(active) => {
                    (active.barrier.outcome(), active.barrier.missing())
                }
                PeerState::Idle => (BarrierOutcome::Satisfied, Vec::new()),
            };
            match outcome {
                BarrierOutcome::Satisfied => return Ok(()),
                BarrierOutcome::Failed {
                    party,
                    phase,
                    reason,
                } => {
                    return Err(DispatchError::RemoteFailure {
                        party: self.local,
                        job: job.name.clone(),
                        remote: party,
                        phase,
                        reason,
                    })
                }
                BarrierOutcome::Pending => {}
            }
            if !self.inbox_open {
                return Err(DispatchError::TransportClosed {
                    party: self.local,
                    job: job.name.clone(),
                    phase: Phase::Barrier,
                });
            }

            let expiry = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = self.inbox.recv() => match frame {
                    Some(frame) => self.handle(frame),
                    None => self.inbox_open = false,
                },
                _ = cancel.cancelled() => {
                    return Err(DispatchError::Cancelled {
                        party: self.local,
                        job: job.name.clone(),
                        phase: Phase::Barrier,
                    });
                }
                _ = expiry => {
                    return Err(DispatchError::Timeout {
                        party: self.local,
                        job: job.name.clone(),
                        missing,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use trustflow_core::config::BackendKind;
    use trustflow_planner::job::JobDetail;

    use super::*;
    use crate::backend::NoopBackend;
    use crate::transport::mem;

    fn p(v: u64) -> PartyId {
        PartyId::new(v)
    }

    fn job(name: &str, parties: &[u64]) -> Job {
        Job {
            name: name.into(),
            code_dir: format!("/tmp/{name}"),
            backend: BackendKind::Motion,
            input_parties: parties.iter().map(|v| p(*v)).collect::<BTreeSet<_>>(),
            skip: false,
            ops: Vec::new(),
            detail: JobDetail::Motion,
        }
    }

    fn frame(c: Completion) -> Vec<u8> {
        c.encode().unwrap()
    }

    fn lone_peer(local: u64) -> Peer {
        let mut net = mem::network([p(local), p(99)]);
        let (t, inbox) = net.remove(&p(local)).unwrap();
        Peer::new(p(local), t, inbox)
    }

    #[test]
    fn rejects_frames_for_unknown_jobs_and_self() {
        let mut peer = lone_peer(1);
        assert!(matches!(
            peer.receive(&frame(Completion::done(p(2), "nope"))),
            Err(ProtocolError::UnknownJob { .. })
        ));
        peer.schedule([&job("j", &[1, 2])]);
        assert!(matches!(
            peer.receive(&frame(Completion::done(p(1), "j"))),
            Err(ProtocolError::UnexpectedSender { .. })
        ));
        assert!(matches!(
            peer.receive(&frame(Completion::done(p(3), "j"))),
            Err(ProtocolError::UnexpectedSender { .. })
        ));
        assert!(matches!(
            peer.receive(b"garbage"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn backlog_keeps_one_frame_per_sender() {
        let mut peer = lone_peer(1);
        peer.schedule([&job("later", &[1, 2])]);
        peer.receive(&frame(Completion::done(p(2), "later"))).unwrap();
        assert!(matches!(
            peer.receive(&frame(Completion::done(p(2), "later"))),
            Err(ProtocolError::Duplicate { .. })
        ));
        assert_eq!(peer.backlog_len("later"), 1);
    }

    #[tokio::test]
    async fn single_party_job_needs_no_barrier() {
        let mut peer = lone_peer(1);
        let cancel = CancellationToken::new();
        peer.dispatch(&job("solo", &[1]), Arc::new(NoopBackend), &cancel)
            .await
            .unwrap();
        assert!(peer.is_idle());
        assert!(matches!(
            peer.receive(&frame(Completion::done(p(2), "solo"))),
            Err(ProtocolError::Stale { .. })
        ));
    }
}
