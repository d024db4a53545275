use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::converter::Conversion;

/// Deduplication identity of an ingested attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub message_id: String,
    pub checksum: String,
}

/// One attachment as handed over by the source collector.
#[derive(Debug, Clone)]
pub struct Submission {
    pub message_id: String,
    pub filename: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub bytes: Vec<u8>,
}

impl Submission {
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            message_id: self.message_id.clone(),
            checksum: checksum(&self.bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Converted,
    OcrUsed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: Uuid,
    pub key: DocumentKey,
    pub filename: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub byte_len: usize,
    /// Original bytes; persisted next to the record rather than inside it.
    #[serde(skip)]
    pub raw: Arc<Vec<u8>>,
    pub converted_text: Option<String>,
    pub conversion_status: ConversionStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SourceDocument {
    pub fn new(submission: Submission) -> Self {
        let key = submission.key();
        Self {
            id: Uuid::new_v4(),
            key,
            filename: submission.filename,
            subject: submission.subject,
            sender: submission.sender,
            byte_len: submission.bytes.len(),
            raw: Arc::new(submission.bytes),
            converted_text: None,
            conversion_status: ConversionStatus::Pending,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Store the converted text. Returns false if text was already recorded;
    /// converted text is never overwritten.
    pub fn record_conversion(&mut self, conversion: &Conversion) -> bool {
        if self.converted_text.is_some() {
            return false;
        }
        self.converted_text = Some(conversion.text.clone());
        self.conversion_status = conversion.status;
        self.error = None;
        true
    }

    pub fn record_conversion_failure(&mut self, reason: impl Into<String>) {
        self.conversion_status = ConversionStatus::Failed;
        self.error = Some(reason.into());
    }
}

/// Hex SHA-256 of the attachment bytes.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(bytes: &[u8]) -> Submission {
        Submission {
            message_id: "msg-1".to_string(),
            filename: "deck.pdf".to_string(),
            subject: Some("Fund update".to_string()),
            sender: None,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_key_is_stable_for_identical_bytes() {
        assert_eq!(submission(b"abc").key(), submission(b"abc").key());
        assert_ne!(submission(b"abc").key(), submission(b"abd").key());
    }

    #[test]
    fn test_converted_text_is_written_once() {
        let mut doc = SourceDocument::new(submission(b"%PDF-1.4"));
        let first = Conversion {
            text: "first".to_string(),
            status: ConversionStatus::Converted,
            page_count: 1,
            ocr_pages: vec![],
            unreadable_pages: vec![],
        };
        let second = Conversion {
            text: "second".to_string(),
            status: ConversionStatus::OcrUsed,
            page_count: 1,
            ocr_pages: vec![1],
            unreadable_pages: vec![],
        };

        assert!(doc.record_conversion(&first));
        assert!(!doc.record_conversion(&second));
        assert_eq!(doc.converted_text.as_deref(), Some("first"));
        assert_eq!(doc.conversion_status, ConversionStatus::Converted);
    }
}
