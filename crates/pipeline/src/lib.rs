pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod runs;
pub mod state;

pub use config::{OperationMode, PipelineConfig};
pub use error::PipelineError;
pub use ledger::{DocumentLedger, DocumentRecord, Receipt};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{BatchSummary, Orchestrator, Stages};
pub use progress::{ProgressEvent, ProgressTracker, STEP_COMPLETE, STEP_ERROR};
pub use retry::RetryPolicy;
pub use runs::{RunGuard, RunRegistry};
pub use state::DocumentState;
