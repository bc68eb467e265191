//! Error taxonomy shared by every versegraph layer.

use std::time::Duration;

/// Errors raised by the remote store, the local cache and the engines built on them.
///
/// There is no conflict variant: concurrent writes are settled by the
/// last-writer-wins reconciler.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation aborted")]
    Aborted,

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Local cache error: {0}")]
    Cache(String),

    #[error("Invalid verse reference: {0}")]
    InvalidReference(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GraphError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
