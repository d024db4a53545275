use extract::FieldName;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("investment {investment_id} is busy (waited {waited_ms}ms)")]
    Contention { investment_id: Uuid, waited_ms: u64 },

    #[error("investment {0} not found")]
    NotFound(Uuid),

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: FieldName, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MergeError {
    /// Storage failures are infrastructure problems rather than per-document ones.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, MergeError::Store(_))
    }
}
