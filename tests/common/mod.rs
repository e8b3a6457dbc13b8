//! Shared builders for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use trustflow_core::dag::{Dag, DagBuilder};
use trustflow_core::id::PartyId;
use trustflow_core::schema::{Column, DataType};
use trustflow_exec::{Backend, BackendError};
use trustflow_planner::job::Job;

pub fn p(v: u64) -> PartyId {
    PartyId::new(v)
}

/// Two integer columns `a`, `b` trusted to `trust`.
pub fn cols(trust: &[u64]) -> Vec<Column> {
    ["a", "b"]
        .into_iter()
        .map(|n| Column::new(n, DataType::Int64, trust.iter().map(|v| p(*v))))
        .collect()
}

/// in1@p1, in2@p2 → concat → aggregate → store to p1.
///
/// Columns are trusted only to their owners, so the shared part needs real MPC.
pub fn two_party_dag() -> Dag {
    let mut b = DagBuilder::new();
    let in1 = b.create("in1", cols(&[1]), [p(1)]).unwrap();
    let in2 = b.create("in2", cols(&[2]), [p(2)]).unwrap();
    let rel = b.concat(&[in1, in2], "rel").unwrap();
    let agg = b
        .aggregate(rel, "agg", &["a"], "b", trustflow_core::dag::Aggregator::Sum, "total")
        .unwrap();
    b.store(agg, "out", [p(1)]).unwrap();
    b.build().unwrap()
}

/// Backend that records `(party, job, phase)` and can be told to fail.
#[derive(Clone)]
pub struct Recorder {
    pub party: PartyId,
    pub log: Arc<Mutex<Vec<(PartyId, String, &'static str)>>>,
    pub fail_execute: bool,
    pub delay_ms: u64,
}

impl Recorder {
    pub fn new(party: PartyId, log: Arc<Mutex<Vec<(PartyId, String, &'static str)>>>) -> Self {
        Self {
            party,
            log,
            fail_execute: false,
            delay_ms: 0,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn slow(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

impl Backend for Recorder {
    fn setup(&self, job: &Job) -> Result<(), BackendError> {
        self.log
            .lock()
            .unwrap()
            .push((self.party, job.name.clone(), "setup"));
        Ok(())
    }

    fn execute(&self, job: &Job) -> Result<(), BackendError> {
        if self.delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.delay_ms));
        }
        self.log
            .lock()
            .unwrap()
            .push((self.party, job.name.clone(), "execute"));
        if self.fail_execute {
            return Err(BackendError::Aborted("boom".into()));
        }
        Ok(())
    }
}
