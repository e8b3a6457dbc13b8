use thiserror::Error;
use trustflow_core::id::PartyId;

use crate::message::Phase;

fn parties(list: &[PartyId]) -> String {
    list.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of one job's dispatch at one party.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("party {party}: job '{job}' refused at register: still dispatching '{active}'")]
    Busy {
        party: PartyId,
        job: String,
        active: String,
    },

    #[error("party {party}: job '{job}' failed at setup: {source}")]
    Setup {
        party: PartyId,
        job: String,
        source: BackendError,
    },

    #[error("party {party}: job '{job}' failed at execute: {source}")]
    Execute {
        party: PartyId,
        job: String,
        source: BackendError,
    },

    #[error("party {party}: job '{job}' aborted at barrier: party {remote} failed at {phase}: {reason}")]
    RemoteFailure {
        party: PartyId,
        job: String,
        remote: PartyId,
        phase: Phase,
        reason: String,
    },

    #[error("party {party}: job '{job}' timed out at barrier waiting for [{}]", parties(.missing))]
    Timeout {
        party: PartyId,
        job: String,
        missing: Vec<PartyId>,
    },

    #[error("party {party}: job '{job}' cancelled at {phase}")]
    Cancelled {
        party: PartyId,
        job: String,
        phase: Phase,
    },

    #[error("party {party}: job '{job}' lost its inbox at {phase}")]
    TransportClosed {
        party: PartyId,
        job: String,
        phase: Phase,
    },

    #[error("party {party}: job '{job}' could not notify peers at {phase}: {source}")]
    Transport {
        party: PartyId,
        job: String,
        phase: Phase,
        source: TransportError,
    },
}

impl DispatchError {
    pub fn job(&self) -> &str {
        match self {
            DispatchError::Busy { job, .. }
            | DispatchError::Setup { job, .. }
            | DispatchError::Execute { job, .. }
            | DispatchError::RemoteFailure { job, .. }
            | DispatchError::Timeout { job, .. }
            | DispatchError::Cancelled { job, .. }
            | DispatchError::TransportClosed { job, .. }
            | DispatchError::Transport { job, .. } => job,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            DispatchError::Busy { .. } => Phase::Register,
            DispatchError::Setup { .. } => Phase::Setup,
            DispatchError::Execute { .. } => Phase::Execute,
            DispatchError::RemoteFailure { .. } | DispatchError::Timeout { .. } => Phase::Barrier,
            DispatchError::Cancelled { phase, .. }
            | DispatchError::TransportClosed { phase, .. }
            | DispatchError::Transport { phase, .. } => *phase,
        }
    }
}

/// Incoming frame that was rejected; logged and dropped by the peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("completion for '{job}' from {sender}, who is not a co-participant")]
    UnexpectedSender { sender: PartyId, job: String },

    #[error("duplicate completion for '{job}' from {sender}")]
    Duplicate { sender: PartyId, job: String },

    #[error("completion for unknown job '{job}' from {sender}")]
    UnknownJob { sender: PartyId, job: String },

    #[error("completion for finished job '{job}' from {sender}")]
    Stale { sender: PartyId, job: String },
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: String },

    #[error("backend task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to party {0}")]
    UnknownParty(PartyId),

    #[error("link to party {0} is closed")]
    Closed(PartyId),

    #[error("could not encode frame: {0}")]
    Encode(String),

    #[error("transport io: {0}")]
    Io(String),
}
