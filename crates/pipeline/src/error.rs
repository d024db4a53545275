use crate::state::DocumentState;
use merge::{MergeError, StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a batch run is already active for tenant {tenant}")]
    AlreadyRunning { tenant: String },

    /// Durable storage failed; aborts the whole batch.
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("document {0} not found")]
    UnknownDocument(Uuid),

    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: DocumentState,
        to: DocumentState,
    },
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(StoreError::Io(err))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Storage(StoreError::Serde(err))
    }
}
