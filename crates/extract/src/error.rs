use thiserror::Error;

/// Failures of the model-backed stages.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("triage failed: {0}")]
    Triage(String),

    #[error("extraction output unusable after {attempts} attempts: {last_error}")]
    ExtractionFormat { attempts: u32, last_error: String },

    #[error("enrichment failed: {0}")]
    Enrichment(String),

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("stage timed out after {0}s")]
    Timeout(u64),
}

impl StageError {
    /// Transport and timeout failures may succeed on a later call; format failures will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transport(_) | StageError::Timeout(_))
    }

    /// Classifies a model client error, keeping reqwest timeouts distinct.
    pub fn from_transport(err: &anyhow::Error) -> Self {
        let timed_out = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout());
        if timed_out {
            StageError::Timeout(0)
        } else {
            StageError::Transport(format!("{err:#}"))
        }
    }
}
