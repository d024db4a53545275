pub mod converter;
pub mod document;
pub mod error;
pub mod pdf;

pub use converter::{
    Conversion, ConverterConfig, DocumentConverter, OcrEngine, OcrFailure, PageRasterizer,
    PdfTextSource,
};
pub use document::{checksum, ConversionStatus, DocumentKey, SourceDocument, Submission};
pub use error::ConversionError;
pub use pdf::{LopdfPageImages, PdfExtractSource};

use std::sync::Arc;

/// Converter backed by pdf-extract for text layers and embedded page images
/// for OCR input.
pub fn pdf_converter(config: ConverterConfig) -> DocumentConverter {
    DocumentConverter::new(Arc::new(PdfExtractSource), Arc::new(LopdfPageImages), config)
}
