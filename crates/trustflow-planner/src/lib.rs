#![forbid(unsafe_code)]
//! trustflow-planner: from a (YAML) workflow → operator DAG → ordered plan of
//! backend jobs.
//!
//! Design:
//! - The DAG model lives in `trustflow-core`; this crate only reads it.
//! - Backend capabilities are data (`registry`), consulted through a
//!   replaceable `policy`.
//! - The partitioner emits an immutable `Plan` with explicit Close/Open
//!   boundary operators wherever a relation changes representation.

pub mod dsl;
pub mod error;
pub mod job;
pub mod partition;
pub mod plan;
pub mod policy;
pub mod registry;

pub use dsl::yaml::{parse_workflow, ParsedWorkflow, WorkflowConfig};
pub use error::{PlanningError, Result};
pub use job::{Boundary, BoundaryKind, Job, JobDetail, PlannedOp};
pub use partition::{partition, Partitioner};
pub use plan::Plan;
pub use policy::{BackendPolicy, CheapestCapable, PreferenceOrder};
pub use registry::{BackendDescriptor, BackendRegistry, Requirement};
