use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid DAG at '{node}': {reason}")]
    InvalidDag { node: String, reason: String },

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),
}

impl Error {
    pub(crate) fn invalid(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDag {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
