//! Workflow front-ends.

pub mod yaml;
