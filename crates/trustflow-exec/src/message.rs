//! Completion messages exchanged between peers after each job.

use std::fmt;

use serde::{Deserialize, Serialize};
use trustflow_core::id::PartyId;

use crate::error::{ProtocolError, TransportError};

/// Step of the per-job dispatch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Register,
    Setup,
    Execute,
    Broadcast,
    Barrier,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Register => "register",
            Phase::Setup => "setup",
            Phase::Execute => "execute",
            Phase::Broadcast => "broadcast",
            Phase::Barrier => "barrier",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Done,
    Failed { phase: Phase, reason: String },
}

/// `{ "sender": 1, "job": "job-0-python", "status": "done" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub sender: PartyId,
    pub job: String,
    pub status: Status,
}

impl Completion {
    pub fn done(sender: PartyId, job: impl Into<String>) -> Self {
        Self {
            sender,
            job: job.into(),
            status: Status::Done,
        }
    }

    pub fn failed(
        sender: PartyId,
        job: impl Into<String>,
        phase: Phase,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            job: job.into(),
            status: Status::Failed {
                phase,
                reason: reason.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encode(e.to_string()))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_plain_json() {
        let done = Completion::done(PartyId::new(1), "job-0-python");
        let bytes = done.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"sender":1,"job":"job-0-python","status":"done"}"#
        );

        let failed = Completion::failed(PartyId::new(2), "j", Phase::Setup, "boom");
        let back = Completion::decode(&failed.encode().unwrap()).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Completion::decode(b"{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Completion::decode(br#"{"sender":1,"job":"j","status":"maybe"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
