use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and model selection for every model-backed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub triage_model: String,
    pub extraction_model: String,
    pub enrichment_model: String,
    pub vision_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            triage_model: "llama3".to_string(),
            extraction_model: "llama3".to_string(),
            enrichment_model: "llama3".to_string(),
            vision_model: "llava".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Narrow completion interface the stages are written against.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Plain completion constrained to JSON output.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;

    /// `images` are base64-encoded.
    async fn generate_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: Vec<String>,
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>, // "json" for structured output
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// True when the model server answers its tag listing.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn send(&self, request: OllamaRequest<'_>) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

#[async_trait]
impl TextModel for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        self.send(OllamaRequest {
            model,
            prompt,
            stream: false,
            format: Some("json"),
            images: Vec::new(),
        })
        .await
    }

    async fn generate_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: Vec<String>,
    ) -> Result<String> {
        self.send(OllamaRequest {
            model,
            prompt,
            stream: false,
            format: None,
            images,
        })
        .await
    }
}
