use extract::ModelConfig;
use ingest::ConverterConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: OperationMode,
    pub models: ModelConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub conversion: ConversionConfig,
    pub extraction: ExtractionConfig,
    pub matching: MatchingConfig,
    pub storage: StorageConfig,
    pub enrichment_enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // fewer retries, short timeouts, no enrichment
    Accurate, // more retries, long timeouts
    Balanced,
}

impl std::str::FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(OperationMode::Fast),
            "accurate" => Ok(OperationMode::Accurate),
            "balanced" => Ok(OperationMode::Balanced),
            other => Err(format!("unknown pipeline mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per call to triage, extraction or enrichment.
    pub stage_timeout_secs: u64,
    /// Per OCR'd page.
    pub ocr_timeout_secs: u64,
    /// How long a merge waits for an investment held by another writer.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub min_chars_per_page: usize,
    pub min_printable_ratio: f32,
    pub ocr_dpi: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub max_format_attempts: u32,
    /// Grapheme budget of the first-pass triage excerpt.
    pub excerpt_chars: usize,
    /// Grapheme budget of text sent to full-text triage and extraction.
    pub full_text_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub similarity_threshold: f64,
    pub firm_weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ledger, investments, converted text and packets live here when set.
    pub data_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            models: ModelConfig::default(),
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            timeouts: TimeoutConfig {
                stage_timeout_secs: 120,
                ocr_timeout_secs: 120,
                lock_timeout_ms: 5000,
            },
            conversion: ConversionConfig {
                min_chars_per_page: 20,
                min_printable_ratio: 0.6,
                ocr_dpi: 300,
            },
            extraction: ExtractionConfig {
                max_format_attempts: 3,
                excerpt_chars: 1000,
                full_text_chars: 24000,
            },
            matching: MatchingConfig {
                similarity_threshold: 0.88,
                firm_weight: 0.4,
            },
            storage: StorageConfig::default(),
            enrichment_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.mode = OperationMode::Fast;
        config.retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 2000,
        };
        config.timeouts.stage_timeout_secs = 45;
        config.timeouts.ocr_timeout_secs = 60;
        config.extraction.max_format_attempts = 2;
        config.extraction.full_text_chars = 12000;
        config.enrichment_enabled = false;
        config
    }

    pub fn accurate() -> Self {
        let mut config = Self::default();
        config.mode = OperationMode::Accurate;
        config.retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 2000,
            max_backoff_ms: 20000,
        };
        config.timeouts.stage_timeout_secs = 300;
        config.timeouts.ocr_timeout_secs = 240;
        config.extraction.max_format_attempts = 4;
        config.extraction.full_text_chars = 48000;
        config
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast(),
            OperationMode::Accurate => Self::accurate(),
            OperationMode::Balanced => Self::default(),
        }
    }

    pub fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            min_chars_per_page: self.conversion.min_chars_per_page,
            min_printable_ratio: self.conversion.min_printable_ratio,
            ocr_dpi: self.conversion.ocr_dpi,
            ocr_timeout_secs: self.timeouts.ocr_timeout_secs,
            ocr_retries: self.retry.max_retries as u32,
            ocr_backoff_ms: self.retry.initial_backoff_ms,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.stage_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.lock_timeout_ms)
    }
}
