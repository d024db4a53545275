//! Model-backed stages: relevance triage, field extraction, leader enrichment
//! and vision OCR, each behind a narrow trait so backends can be swapped.

pub mod enrich;
pub mod error;
pub mod fields;
pub mod llm;
pub mod ocr;
pub mod prompt;
pub mod response;
pub mod schema;
pub mod triage;

#[cfg(test)]
pub(crate) mod testing;

pub use enrich::{Enricher, ModelEnricher};
pub use error::StageError;
pub use fields::{Extractor, FieldExtraction, ModelExtractor};
pub use llm::{ModelConfig, OllamaClient, TextModel};
pub use ocr::VisionOcr;
pub use schema::{
    Confidence, Extracted, ExtractedFields, ExtractionResult, FieldName, Leader,
};
pub use triage::{Classifier, ModelClassifier, Relevance, TriageOutcome, TriageSignals, TriageVerdict};
