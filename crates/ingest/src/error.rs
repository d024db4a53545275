use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConversionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt or unreadable document: {0}")]
    Corrupt(String),

    #[error("Text encoding error: {0}")]
    Encoding(String),

    #[error("Page {page} could not be rendered: {reason}")]
    Render { page: usize, reason: String },

    #[error("OCR failed on page {page}: {reason}")]
    Ocr { page: usize, reason: String },

    #[error("OCR timed out on page {page}")]
    OcrTimeout { page: usize },

    #[error("No text could be extracted from the document")]
    Empty,
}
