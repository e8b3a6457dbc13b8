use thiserror::Error;
use trustflow_core::id::PartyId;

pub type Result<T> = std::result::Result<T, PlanningError>;

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no backend can host '{node}' (needs {requirement})")]
    NoBackend { node: String, requirement: String },

    #[error("'{node}' would disclose '{relation}' to party {party}")]
    Disclosure {
        node: String,
        party: PartyId,
        relation: String,
    },

    #[error(transparent)]
    Dag(#[from] trustflow_core::Error),

    #[error("workflow: {0}")]
    Workflow(String),

    #[error("inconsistent plan: {0}")]
    Inconsistent(String),
}

impl From<serde_yaml::Error> for PlanningError {
    fn from(e: serde_yaml::Error) -> Self {
        PlanningError::Workflow(e.to_string())
    }
}
