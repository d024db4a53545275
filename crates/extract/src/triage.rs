use crate::error::StageError;
use crate::llm::TextModel;
use crate::prompt;
use crate::response;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Relevant,
    Irrelevant,
    Uncertain,
}

impl Relevance {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "relevant" | "yes" => Some(Relevance::Relevant),
            "irrelevant" | "no" => Some(Relevance::Irrelevant),
            "uncertain" | "unsure" => Some(Relevance::Uncertain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageVerdict {
    pub relevance: Relevance,
    pub rationale: String,
}

impl TriageVerdict {
    pub fn new(relevance: Relevance, rationale: impl Into<String>) -> Self {
        Self {
            relevance,
            rationale: rationale.into(),
        }
    }
}

/// Cheap signals for the first triage pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageSignals {
    pub filename: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub excerpt: String,
}

impl TriageSignals {
    /// `excerpt_chars` counts grapheme clusters, so multi-byte text is never split mid-character.
    pub fn new(
        filename: impl Into<String>,
        subject: Option<String>,
        sender: Option<String>,
        text: &str,
        excerpt_chars: usize,
    ) -> Self {
        Self {
            filename: filename.into(),
            subject,
            sender,
            excerpt: truncate_graphemes(text, excerpt_chars),
        }
    }
}

pub fn truncate_graphemes(text: &str, max: usize) -> String {
    text.graphemes(true).take(max).collect()
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, signals: &TriageSignals) -> Result<TriageVerdict, StageError>;

    async fn classify_full_text(
        &self,
        signals: &TriageSignals,
        full_text: &str,
    ) -> Result<TriageVerdict, StageError>;
}

/// Final triage decision for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub relevant: bool,
    pub rationale: String,
    /// The first pass was uncertain and the full text was consulted.
    pub escalated: bool,
}

/// Runs the two-pass triage: an uncertain first verdict is re-asked with the full
/// text, and a second uncertain answer is treated as relevant.
pub async fn decide(
    classifier: &dyn Classifier,
    signals: &TriageSignals,
    full_text: &str,
) -> Result<TriageOutcome, StageError> {
    let first = classifier.classify(signals).await?;
    match first.relevance {
        Relevance::Relevant => Ok(TriageOutcome {
            relevant: true,
            rationale: first.rationale,
            escalated: false,
        }),
        Relevance::Irrelevant => Ok(TriageOutcome {
            relevant: false,
            rationale: first.rationale,
            escalated: false,
        }),
        Relevance::Uncertain => {
            debug!(filename = %signals.filename, "triage uncertain, escalating to full text");
            let second = classifier.classify_full_text(signals, full_text).await?;
            Ok(TriageOutcome {
                relevant: second.relevance != Relevance::Irrelevant,
                rationale: second.rationale,
                escalated: true,
            })
        }
    }
}

/// Unparsable output is an uncertain verdict, never an error.
pub fn parse_verdict(raw: &str) -> TriageVerdict {
    let Ok(map) = response::json_object(raw) else {
        return TriageVerdict::new(Relevance::Uncertain, "unparsable triage response");
    };

    let relevance = map
        .get("relevance")
        .or_else(|| map.get("classification"))
        .and_then(|v| v.as_str())
        .and_then(Relevance::parse)
        .unwrap_or(Relevance::Uncertain);
    let rationale = map
        .get("rationale")
        .or_else(|| map.get("reason"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    TriageVerdict::new(relevance, rationale)
}

pub struct ModelClassifier {
    model: Arc<dyn TextModel>,
    model_name: String,
    full_text_chars: usize,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>, full_text_chars: usize) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            full_text_chars,
        }
    }

    async fn ask(&self, prompt: &str) -> Result<TriageVerdict, StageError> {
        let raw = self
            .model
            .generate(&self.model_name, prompt)
            .await
            .map_err(|e| StageError::from_transport(&e))?;
        let verdict = parse_verdict(&raw);
        info!(relevance = ?verdict.relevance, rationale = %verdict.rationale, "triage verdict");
        Ok(verdict)
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, signals: &TriageSignals) -> Result<TriageVerdict, StageError> {
        self.ask(&prompt::build_triage_prompt(signals)).await
    }

    async fn classify_full_text(
        &self,
        signals: &TriageSignals,
        full_text: &str,
    ) -> Result<TriageVerdict, StageError> {
        let text = truncate_graphemes(full_text, self.full_text_chars);
        self.ask(&prompt::build_full_text_triage_prompt(signals, &text)).await
    }
}
