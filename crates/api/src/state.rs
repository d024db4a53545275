use extract::OllamaClient;
use pipeline::Orchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Probed by `/health`; absent when stages are not model-backed.
    pub model_client: Option<Arc<OllamaClient>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, model_client: Option<Arc<OllamaClient>>) -> Self {
        Self {
            orchestrator,
            model_client,
        }
    }
}
