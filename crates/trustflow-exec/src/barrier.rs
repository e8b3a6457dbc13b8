//! Per-job completion barrier.
//!
//! Frames filed before the waits are armed sit in the early set; arming moves
//! them into the write-once wait slots. The outcome only depends on which
//! statuses arrived, never on their order.

use std::collections::{BTreeMap, BTreeSet};

use trustflow_core::id::PartyId;

use crate::error::ProtocolError;
use crate::message::{Completion, Phase, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierOutcome {
    Pending,
    Satisfied,
    Failed {
        party: PartyId,
        phase: Phase,
        reason: String,
    },
}

#[derive(Debug)]
pub struct Barrier {
    job: String,
    expected: BTreeSet<PartyId>,
    armed: bool,
    waits: BTreeMap<PartyId, Option<Status>>,
    early: BTreeMap<PartyId, Status>,
}

impl Barrier {
    pub fn new(job: impl Into<String>, expected: BTreeSet<PartyId>) -> Self {
        Self {
            job: job.into(),
            expected,
            armed: false,
            waits: BTreeMap::new(),
            early: BTreeMap::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Number of frames received before the waits were armed.
    pub fn early_len(&self) -> usize {
        self.early.len()
    }

    /// Record a completion for this job.
    pub fn file(&mut self, c: Completion) -> Result<(), ProtocolError> {
        if c.job != self.job {
            return Err(ProtocolError::UnknownJob {
                sender: c.sender,
                job: c.job,
            });
        }
        if !self.expected.contains(&c.sender) {
            return Err(ProtocolError::UnexpectedSender {
                sender: c.sender,
                job: c.job,
            });
        }
        let seen = self.early.contains_key(&c.sender)
            || self.waits.get(&c.sender).is_some_and(|slot| slot.is_some());
        if seen {
            return Err(ProtocolError::Duplicate {
                sender: c.sender,
                job: c.job,
            });
        }

        if self.armed {
            self.waits.insert(c.sender, Some(c.status));
        } else {
            self.early.insert(c.sender, c.status);
        }
        Ok(())
    }

    /// Register one wait per expected party, resolving from the early set.
    pub fn arm(&mut self) {
        if self.armed {
            return;
        }
        self.armed = true;
        for p in &self.expected {
            let slot = self.early.remove(p);
            self.waits.insert(*p, slot);
        }
    }

    pub fn outcome(&self) -> BarrierOutcome {
        // Lowest failing party first, so every peer reports the same cause.
        let filed = self
            .waits
            .iter()
            .filter_map(|(p, s)| s.as_ref().map(|s| (p, s)))
            .chain(self.early.iter());
        let mut failures: Vec<_> = filed
            .filter_map(|(p, s)| match s {
                Status::Failed { phase, reason } => Some((*p, *phase, reason.clone())),
                Status::Done => None,
            })
            .collect();
        failures.sort_by_key(|(p, _, _)| *p);
        if let Some((party, phase, reason)) = failures.into_iter().next() {
            return BarrierOutcome::Failed {
                party,
                phase,
                reason,
            };
        }

        if self.armed && self.waits.values().all(|s| s.is_some()) {
            BarrierOutcome::Satisfied
        } else {
            BarrierOutcome::Pending
        }
    }

    /// Expected parties that have not reported yet.
    pub fn missing(&self) -> Vec<PartyId> {
        self.expected
            .iter()
            .copied()
            .filter(|p| {
                !self.early.contains_key(p) && !self.waits.get(p).is_some_and(|s| s.is_some())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u64) -> PartyId {
        PartyId::new(v)
    }

    fn barrier() -> Barrier {
        Barrier::new("j", [p(2), p(3)].into_iter().collect())
    }

    #[test]
    fn early_frames_resolve_on_arm() {
        let mut b = barrier();
        b.file(Completion::done(p(2), "j")).unwrap();
        b.file(Completion::done(p(3), "j")).unwrap();
        assert_eq!(b.outcome(), BarrierOutcome::Pending);
        assert_eq!(b.early_len(), 2);
        b.arm();
        assert_eq!(b.outcome(), BarrierOutcome::Satisfied);
    }

    #[test]
    fn slots_are_write_once() {
        let mut b = barrier();
        b.file(Completion::done(p(2), "j")).unwrap();
        assert!(matches!(
            b.file(Completion::done(p(2), "j")),
            Err(ProtocolError::Duplicate { .. })
        ));
        b.arm();
        assert!(matches!(
            b.file(Completion::done(p(2), "j")),
            Err(ProtocolError::Duplicate { .. })
        ));
        assert_eq!(b.missing(), vec![p(3)]);
    }

    #[test]
    fn strangers_and_other_jobs_are_rejected() {
        let mut b = barrier();
        assert!(matches!(
            b.file(Completion::done(p(9), "j")),
            Err(ProtocolError::UnexpectedSender { .. })
        ));
        assert!(matches!(
            b.file(Completion::done(p(2), "other")),
            Err(ProtocolError::UnknownJob { .. })
        ));
    }

    #[test]
    fn any_failure_fails_the_barrier() {
        let mut b = barrier();
        b.arm();
        b.file(Completion::done(p(2), "j")).unwrap();
        b.file(Completion::failed(p(3), "j", Phase::Execute, "exit 1"))
            .unwrap();
        assert_eq!(
            b.outcome(),
            BarrierOutcome::Failed {
                party: p(3),
                phase: Phase::Execute,
                reason: "exit 1".into()
            }
        );
    }
}
