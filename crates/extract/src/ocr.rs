use crate::llm::TextModel;
use crate::prompt::OCR_PROMPT;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ingest::{OcrEngine, OcrFailure};
use std::sync::Arc;

/// OCR backed by a vision-capable model.
pub struct VisionOcr {
    model: Arc<dyn TextModel>,
    model_name: String,
}

impl VisionOcr {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrFailure> {
        let encoded = STANDARD.encode(image);
        let text = self
            .model
            .generate_with_images(&self.model_name, OCR_PROMPT, vec![encoded])
            .await
            .map_err(|e| OcrFailure(format!("{e:#}")))?;
        Ok(text.trim().to_string())
    }
}
