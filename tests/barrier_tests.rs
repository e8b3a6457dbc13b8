//! Barrier outcomes do not depend on arrival order or on when waits are armed.

use std::collections::BTreeSet;

use proptest::prelude::*;
use trustflow_core::id::PartyId;
use trustflow_exec::{Barrier, BarrierOutcome, Completion, Phase};

const JOB: &str = "job-0-motion";

fn completion(party: u64, ok: bool) -> Completion {
    if ok {
        Completion::done(PartyId::new(party), JOB)
    } else {
        Completion::failed(PartyId::new(party), JOB, Phase::Execute, format!("party {party}"))
    }
}

fn expected(statuses: &[(u64, bool)]) -> BarrierOutcome {
    match statuses.iter().filter(|(_, ok)| !ok).map(|(p, _)| *p).min() {
        Some(p) => BarrierOutcome::Failed {
            party: PartyId::new(p),
            phase: Phase::Execute,
            reason: format!("party {p}"),
        },
        None => BarrierOutcome::Satisfied,
    }
}

fn arrivals() -> impl Strategy<Value = (Vec<(u64, bool)>, Vec<(u64, bool)>, usize)> {
    prop::collection::vec(any::<bool>(), 1..6).prop_flat_map(|oks| {
        let statuses: Vec<(u64, bool)> = oks
            .iter()
            .enumerate()
            .map(|(i, ok)| (i as u64 + 2, *ok))
            .collect();
        let n = statuses.len();
        (
            Just(statuses.clone()),
            Just(statuses).prop_shuffle(),
            0..=n,
        )
    })
}

proptest! {
    #[test]
    fn outcome_is_order_independent((statuses, order, arm_at) in arrivals()) {
        let expected_parties: BTreeSet<PartyId> =
            statuses.iter().map(|(p, _)| PartyId::new(*p)).collect();
        let mut barrier = Barrier::new(JOB, expected_parties);

        for (i, (party, ok)) in order.iter().enumerate() {
            if i == arm_at {
                barrier.arm();
            }
            barrier.file(completion(*party, *ok)).unwrap();
        }
        barrier.arm();

        prop_assert_eq!(barrier.outcome(), expected(&statuses));
        prop_assert!(barrier.missing().is_empty());
    }

    #[test]
    fn pending_until_everyone_reported((statuses, order, _) in arrivals()) {
        let expected_parties: BTreeSet<PartyId> =
            statuses.iter().map(|(p, _)| PartyId::new(*p)).collect();
        let mut barrier = Barrier::new(JOB, expected_parties);
        barrier.arm();

        let (last, rest) = order.split_last().unwrap();
        for (party, _) in rest {
            barrier.file(completion(*party, true)).unwrap();
            prop_assert_eq!(barrier.outcome(), BarrierOutcome::Pending);
        }
        prop_assert_eq!(barrier.missing(), vec![PartyId::new(last.0)]);
        barrier.file(completion(last.0, true)).unwrap();
        prop_assert_eq!(barrier.outcome(), BarrierOutcome::Satisfied);
    }
}

#[test]
fn empty_barrier_is_satisfied_once_armed() {
    let mut barrier = Barrier::new(JOB, BTreeSet::new());
    assert_eq!(barrier.outcome(), BarrierOutcome::Pending);
    barrier.arm();
    assert_eq!(barrier.outcome(), BarrierOutcome::Satisfied);
}
