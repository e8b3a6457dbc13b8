//! trustflow-core: ids, relation schemas with trust sets, the operator DAG,
//! configuration types and hashing. No async, no IO.

#![forbid(unsafe_code)]

pub mod config;
pub mod dag;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod viz;

pub use error::{Error, Result};
