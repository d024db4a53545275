mod config;
mod error;
mod routes;
mod scheduler;
mod state;

use anyhow::{Context, Result};
use config::AppConfig;
use extract::{Enricher, ModelClassifier, ModelEnricher, ModelExtractor, OllamaClient, TextModel, VisionOcr};
use pipeline::{Orchestrator, Stages};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn model_stages(config: &pipeline::PipelineConfig, model: Arc<dyn TextModel>) -> Stages {
    let models = &config.models;

    let ocr = VisionOcr::new(Arc::clone(&model), models.vision_model.clone());
    let converter = ingest::pdf_converter(config.converter_config()).with_ocr(Arc::new(ocr));

    let enricher = config.enrichment_enabled.then(|| {
        Arc::new(ModelEnricher::new(Arc::clone(&model), models.enrichment_model.clone()))
            as Arc<dyn Enricher>
    });

    Stages {
        converter: Arc::new(converter),
        classifier: Arc::new(ModelClassifier::new(
            Arc::clone(&model),
            models.triage_model.clone(),
            config.extraction.full_text_chars,
        )),
        extractor: Arc::new(ModelExtractor::new(
            Arc::clone(&model),
            models.extraction_model.clone(),
            config.extraction.max_format_attempts,
            config.extraction.full_text_chars,
        )),
        enricher,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.json_logs);

    let client = Arc::new(
        OllamaClient::from_config(&config.pipeline.models).context("failed to build model client")?,
    );
    if !client.ping().await {
        tracing::warn!(base_url = %config.pipeline.models.base_url, "model endpoint not reachable yet");
    }

    let stages = model_stages(&config.pipeline, client.clone() as Arc<dyn TextModel>);
    let orchestrator = Arc::new(
        Orchestrator::open(config.pipeline.clone(), stages)
            .await
            .context("failed to open pipeline storage")?,
    );

    if config.schedule_interval_secs > 0 && !config.tenants.is_empty() {
        info!(
            interval_secs = config.schedule_interval_secs,
            tenants = ?config.tenants,
            "scheduler enabled"
        );
        scheduler::spawn(
            Arc::clone(&orchestrator),
            config.tenants.clone(),
            Duration::from_secs(config.schedule_interval_secs),
        );
    }

    let app = routes::build_router(AppState::new(orchestrator, Some(client)));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, mode = ?config.pipeline.mode, "server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
