use anyhow::{Context, Result};
use pipeline::{OperationMode, PipelineConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Zero disables the scheduler.
    pub schedule_interval_secs: u64,
    pub tenants: Vec<String>,
    pub json_logs: bool,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            schedule_interval_secs: 0,
            tenants: Vec::new(),
            json_logs: false,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = match var("PIPELINE_MODE") {
            Some(raw) => OperationMode::from_str(&raw).map_err(anyhow::Error::msg)?,
            None => OperationMode::Balanced,
        };
        let mut pipeline = PipelineConfig::for_mode(mode);

        let models = &mut pipeline.models;
        if let Some(url) = var("LLM_BASE_URL") {
            models.base_url = url;
        }
        models.api_key = var("LLM_API_KEY").filter(|k| !k.is_empty());
        if let Some(model) = var("TRIAGE_MODEL") {
            models.triage_model = model;
        }
        if let Some(model) = var("EXTRACTION_MODEL") {
            models.extraction_model = model;
        }
        if let Some(model) = var("ENRICHMENT_MODEL") {
            models.enrichment_model = model;
        }
        if let Some(model) = var("VISION_MODEL") {
            models.vision_model = model;
        }

        if let Some(dir) = var("DATA_DIR") {
            pipeline.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = var("SIMILARITY_THRESHOLD") {
            let threshold: f64 = raw
                .parse()
                .with_context(|| format!("SIMILARITY_THRESHOLD is not a number: {raw}"))?;
            anyhow::ensure!(
                (0.0..=1.0).contains(&threshold),
                "SIMILARITY_THRESHOLD must be between 0 and 1"
            );
            pipeline.matching.similarity_threshold = threshold;
        }
        if let Some(raw) = var("ENRICHMENT_ENABLED") {
            pipeline.enrichment_enabled = matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        let schedule_interval_secs = match var("SCHEDULE_INTERVAL_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SCHEDULE_INTERVAL_SECS is not a number: {raw}"))?,
            None => 0,
        };

        let tenants = var("SCHEDULED_TENANTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            schedule_interval_secs,
            tenants,
            json_logs: var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.schedule_interval_secs, 0);
        assert!(config.tenants.is_empty());
        assert_eq!(config.pipeline.mode, OperationMode::Balanced);
        assert!(config.pipeline.storage.data_dir.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PIPELINE_MODE", "fast"),
            ("LLM_BASE_URL", "http://models:8080"),
            ("EXTRACTION_MODEL", "qwen2.5:14b"),
            ("DATA_DIR", "/var/lib/intake"),
            ("SCHEDULED_TENANTS", "acme, beta ,,"),
            ("SCHEDULE_INTERVAL_SECS", "900"),
            ("SIMILARITY_THRESHOLD", "0.9"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.pipeline.mode, OperationMode::Fast);
        assert!(!config.pipeline.enrichment_enabled);
        assert_eq!(config.pipeline.models.base_url, "http://models:8080");
        assert_eq!(config.pipeline.models.extraction_model, "qwen2.5:14b");
        assert_eq!(config.pipeline.storage.data_dir, Some(PathBuf::from("/var/lib/intake")));
        assert_eq!(config.tenants, vec!["acme", "beta"]);
        assert_eq!(config.schedule_interval_secs, 900);
        assert_eq!(config.pipeline.matching.similarity_threshold, 0.9);
        assert!(config.json_logs);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AppConfig::from_lookup(lookup(&[("PIPELINE_MODE", "turbo")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("SIMILARITY_THRESHOLD", "1.5")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("SCHEDULE_INTERVAL_SECS", "soon")])).is_err());
    }
}
