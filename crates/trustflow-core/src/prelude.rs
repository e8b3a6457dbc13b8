//! Convenient re-exports for downstream crates.

pub use crate::config::{BackendKind, BackendSettings, DispatchConfig, PartyAddr, PlannerConfig};
pub use crate::dag::{
    Aggregator, Comparator, Dag, DagBuilder, Op, OpNode, OpSummary, OpTag, Operand,
};
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{NodeId, PartyId};
pub use crate::schema::{Column, DataType, Relation};
