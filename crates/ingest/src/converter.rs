use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::ConversionStatus;
use crate::error::ConversionError;

const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Text layer of a PDF, one string per page in page order.
pub trait PdfTextSource: Send + Sync {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ConversionError>;
}

/// Produces an encoded image (PNG/JPEG) of one page for OCR.
pub trait PageRasterizer: Send + Sync {
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ConversionError>;
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct OcrFailure(pub String);

/// OCR backend. Implementations may call out to a remote model.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrFailure>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Pages with fewer non-whitespace characters are treated as scanned.
    pub min_chars_per_page: usize,
    /// Minimum share of readable glyphs among non-whitespace characters.
    pub min_printable_ratio: f32,
    pub ocr_dpi: u32,
    pub ocr_timeout_secs: u64,
    /// Extra attempts after a failed or timed-out OCR call.
    pub ocr_retries: u32,
    /// Delay before the first OCR retry; doubles on each further retry.
    pub ocr_backoff_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: 20,
            min_printable_ratio: 0.6,
            ocr_dpi: 300,
            ocr_timeout_secs: 120,
            ocr_retries: 2,
            ocr_backoff_ms: 500,
        }
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub text: String,
    pub status: ConversionStatus,
    pub page_count: usize,
    /// 1-based page numbers whose text came from OCR.
    pub ocr_pages: Vec<usize>,
    /// 1-based sparse pages whose image could not be rendered for OCR.
    #[serde(default)]
    pub unreadable_pages: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Pdf,
    PlainText,
}

/// Turns raw attachment bytes into text, falling back to per-page OCR when
/// the PDF text layer is too sparse to be useful.
pub struct DocumentConverter {
    text_source: Arc<dyn PdfTextSource>,
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    config: ConverterConfig,
}

impl DocumentConverter {
    pub fn new(
        text_source: Arc<dyn PdfTextSource>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: ConverterConfig,
    ) -> Self {
        Self {
            text_source,
            rasterizer,
            ocr: None,
            config,
        }
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub async fn convert(
        &self,
        filename: &str,
        bytes: Arc<Vec<u8>>,
    ) -> Result<Conversion, ConversionError> {
        match detect_format(filename, &bytes)? {
            Format::PlainText => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| ConversionError::Encoding(e.to_string()))?;
                let text = sanitize_text(&text);
                if text.trim().is_empty() {
                    return Err(ConversionError::Empty);
                }
                Ok(Conversion {
                    text,
                    status: ConversionStatus::Converted,
                    page_count: 1,
                    ocr_pages: vec![],
                    unreadable_pages: vec![],
                })
            }
            Format::Pdf => self.convert_pdf(filename, bytes).await,
        }
    }

    async fn convert_pdf(
        &self,
        filename: &str,
        bytes: Arc<Vec<u8>>,
    ) -> Result<Conversion, ConversionError> {
        let source = Arc::clone(&self.text_source);
        let pdf = Arc::clone(&bytes);

        // pdf-extract can panic on malformed input; the join error covers that.
        let direct_pages = tokio::task::spawn_blocking(move || source.extract_pages(&pdf))
            .await
            .map_err(|e| ConversionError::Corrupt(format!("text extraction aborted: {e}")))??;

        if direct_pages.is_empty() {
            return Err(ConversionError::Corrupt("PDF has no pages".to_string()));
        }

        let page_count = direct_pages.len();
        let mut pages = Vec::with_capacity(page_count);
        let mut ocr_pages = Vec::new();
        let mut render_failures = Vec::new();

        for (index, text) in direct_pages.into_iter().enumerate() {
            let page_number = index + 1;
            if has_text_density(
                &text,
                self.config.min_chars_per_page,
                self.config.min_printable_ratio,
            ) {
                pages.push(text);
                continue;
            }

            let Some(engine) = &self.ocr else {
                debug!(filename, page = page_number, "Sparse page and no OCR engine configured");
                pages.push(text);
                continue;
            };

            match self.ocr_page(engine.as_ref(), &bytes, index).await {
                Ok(ocr_text) => {
                    warn!(
                        filename,
                        page = page_number,
                        text_length = ocr_text.len(),
                        "Page text recovered via OCR; output may vary between runs"
                    );
                    ocr_pages.push(page_number);
                    pages.push(ocr_text);
                }
                Err(err @ ConversionError::Render { .. }) => {
                    warn!(filename, page = page_number, error = %err, "Sparse page could not be rendered, keeping text layer");
                    render_failures.push(err);
                    pages.push(text);
                }
                Err(e) => return Err(e),
            }
        }

        let text = sanitize_text(&pages.join(PAGE_BREAK));
        if text.replace(PAGE_BREAK.trim(), "").trim().is_empty() {
            // A scan we could not decode says more than "no text".
            return Err(render_failures.into_iter().next().unwrap_or(ConversionError::Empty));
        }

        let status = if ocr_pages.is_empty() {
            ConversionStatus::Converted
        } else {
            ConversionStatus::OcrUsed
        };

        info!(
            filename,
            pages = page_count,
            ocr_pages = ocr_pages.len(),
            unreadable_pages = render_failures.len(),
            text_length = text.len(),
            "Document converted"
        );

        Ok(Conversion {
            text,
            status,
            page_count,
            ocr_pages,
            unreadable_pages: render_failures
                .iter()
                .filter_map(|e| match e {
                    ConversionError::Render { page, .. } => Some(*page),
                    _ => None,
                })
                .collect(),
        })
    }

    async fn ocr_page(
        &self,
        engine: &dyn OcrEngine,
        bytes: &Arc<Vec<u8>>,
        index: usize,
    ) -> Result<String, ConversionError> {
        let page = index + 1;
        let rasterizer = Arc::clone(&self.rasterizer);
        let pdf = Arc::clone(bytes);
        let dpi = self.config.ocr_dpi;

        let image = tokio::task::spawn_blocking(move || rasterizer.render_page(&pdf, index, dpi))
            .await
            .map_err(|e| ConversionError::Render {
                page,
                reason: e.to_string(),
            })??;

        let timeout = Duration::from_secs(self.config.ocr_timeout_secs);
        let mut backoff = Duration::from_millis(self.config.ocr_backoff_ms);
        let mut attempt = 0;

        loop {
            let err = match tokio::time::timeout(timeout, engine.recognize(&image)).await {
                Ok(Ok(text)) => {
                    if attempt > 0 {
                        info!(page, attempts = attempt + 1, "OCR succeeded after retries");
                    }
                    return Ok(text);
                }
                Ok(Err(e)) => ConversionError::Ocr {
                    page,
                    reason: e.to_string(),
                },
                Err(_) => ConversionError::OcrTimeout { page },
            };

            attempt += 1;
            if attempt > self.config.ocr_retries {
                return Err(err);
            }
            warn!(
                page,
                attempt,
                max_retries = self.config.ocr_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "OCR attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

fn detect_format(filename: &str, bytes: &[u8]) -> Result<Format, ConversionError> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(Format::Pdf);
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => Err(ConversionError::Corrupt("missing PDF header".to_string())),
        "txt" | "md" | "markdown" => Ok(Format::PlainText),
        "" => Err(ConversionError::UnsupportedFormat("unknown".to_string())),
        other => Err(ConversionError::UnsupportedFormat(other.to_string())),
    }
}

/// True when a page's text layer is long enough and mostly readable glyphs.
pub fn has_text_density(text: &str, min_chars: usize, min_ratio: f32) -> bool {
    let mut total = 0usize;
    let mut readable = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if is_readable(c) {
            readable += 1;
        }
    }

    if total < min_chars {
        return false;
    }
    readable as f32 / total as f32 >= min_ratio
}

fn is_readable(c: char) -> bool {
    c.is_alphanumeric() || c.is_ascii_punctuation() || "•–—€£¥§°±·’“”".contains(c)
}

/// Strip NUL bytes and normalise line endings.
pub fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeText(Vec<String>);

    impl PdfTextSource for FakeText {
        fn extract_pages(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, ConversionError> {
            Ok(self.0.clone())
        }
    }

    struct FailingText;

    impl PdfTextSource for FailingText {
        fn extract_pages(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, ConversionError> {
            Err(ConversionError::Corrupt("bad xref".to_string()))
        }
    }

    struct FakeRaster;

    impl PageRasterizer for FakeRaster {
        fn render_page(
            &self,
            _pdf_bytes: &[u8],
            page_index: usize,
            _dpi: u32,
        ) -> Result<Vec<u8>, ConversionError> {
            Ok(format!("image-{page_index}").into_bytes())
        }
    }

    #[derive(Default)]
    struct RecordingOcr {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OcrEngine for RecordingOcr {
        async fn recognize(&self, image: &[u8]) -> Result<String, OcrFailure> {
            let name = String::from_utf8_lossy(image).to_string();
            self.seen.lock().unwrap().push(name.clone());
            Ok(format!("Scanned text recovered from {name} with fee terms"))
        }
    }

    /// Fails the first `failures` calls, then answers.
    struct FlakyOcr {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyOcr {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FlakyOcr {
        async fn recognize(&self, _image: &[u8]) -> Result<String, OcrFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(OcrFailure("503 service unavailable".to_string()));
            }
            Ok("Scanned capital account statement for Fund IV".to_string())
        }
    }

    struct UndecodableRaster;

    impl PageRasterizer for UndecodableRaster {
        fn render_page(
            &self,
            _pdf_bytes: &[u8],
            page_index: usize,
            _dpi: u32,
        ) -> Result<Vec<u8>, ConversionError> {
            Err(ConversionError::Render {
                page: page_index + 1,
                reason: "unsupported image filter JBIG2Decode".to_string(),
            })
        }
    }

    fn pdf_bytes() -> Arc<Vec<u8>> {
        Arc::new(b"%PDF-1.4 fake".to_vec())
    }

    fn quick_retries() -> ConverterConfig {
        ConverterConfig {
            ocr_backoff_ms: 1,
            ..ConverterConfig::default()
        }
    }

    fn converter(pages: Vec<&str>) -> DocumentConverter {
        DocumentConverter::new(
            Arc::new(FakeText(pages.into_iter().map(String::from).collect())),
            Arc::new(FakeRaster),
            quick_retries(),
        )
    }

    #[test]
    fn test_density_thresholds() {
        assert!(has_text_density("Management fee of 2% per annum on committed capital", 20, 0.6));
        assert!(!has_text_density("   \n  ", 20, 0.6));
        assert!(!has_text_density("\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}ab", 20, 0.6));
    }

    #[tokio::test]
    async fn test_dense_pdf_skips_ocr() {
        let ocr = Arc::new(RecordingOcr::default());
        let converter = converter(vec![
            "Sequoia Capital Fund XVI investor presentation",
            "Management fee 2% and carried interest 20%",
        ])
        .with_ocr(ocr.clone());

        let conversion = converter.convert("deck.pdf", pdf_bytes()).await.unwrap();

        assert_eq!(conversion.status, ConversionStatus::Converted);
        assert_eq!(conversion.page_count, 2);
        assert!(conversion.text.contains(PAGE_BREAK));
        assert!(ocr.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sparse_pages_fall_back_to_ocr_in_page_order() {
        let ocr = Arc::new(RecordingOcr::default());
        let converter = converter(vec![
            "",
            "A real text layer with plenty of readable characters",
            " ",
        ])
        .with_ocr(ocr.clone());

        let conversion = converter.convert("scan.pdf", pdf_bytes()).await.unwrap();

        assert_eq!(conversion.status, ConversionStatus::OcrUsed);
        assert_eq!(conversion.ocr_pages, vec![1, 3]);
        assert_eq!(*ocr.seen.lock().unwrap(), vec!["image-0", "image-2"]);

        let first = conversion.text.find("image-0").unwrap();
        let middle = conversion.text.find("real text layer").unwrap();
        let last = conversion.text.find("image-2").unwrap();
        assert!(first < middle && middle < last);
    }

    #[tokio::test]
    async fn test_transient_ocr_failure_is_retried() {
        let ocr = Arc::new(FlakyOcr::new(1));
        let converter = converter(vec![""]).with_ocr(ocr.clone());

        let conversion = converter.convert("scan.pdf", pdf_bytes()).await.unwrap();

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
        assert_eq!(conversion.status, ConversionStatus::OcrUsed);
        assert!(conversion.text.contains("capital account statement"));
    }

    #[tokio::test]
    async fn test_ocr_failure_fails_conversion_after_retries() {
        let ocr = Arc::new(FlakyOcr::new(usize::MAX));
        let converter = converter(vec![""]).with_ocr(ocr.clone());

        let err = converter.convert("scan.pdf", pdf_bytes()).await.unwrap_err();

        assert!(matches!(err, ConversionError::Ocr { page: 1, ref reason } if reason.contains("503")));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_undecodable_scan_reports_render_error() {
        let converter = DocumentConverter::new(
            Arc::new(FakeText(vec![String::new()])),
            Arc::new(UndecodableRaster),
            quick_retries(),
        )
        .with_ocr(Arc::new(FlakyOcr::new(0)));

        let err = converter.convert("scan.pdf", pdf_bytes()).await.unwrap_err();
        assert!(matches!(err, ConversionError::Render { page: 1, ref reason } if reason.contains("JBIG2Decode")));
    }

    #[tokio::test]
    async fn test_unreadable_page_is_reported_alongside_text() {
        let converter = DocumentConverter::new(
            Arc::new(FakeText(vec![
                "A real text layer with plenty of readable characters".to_string(),
                String::new(),
            ])),
            Arc::new(UndecodableRaster),
            quick_retries(),
        )
        .with_ocr(Arc::new(FlakyOcr::new(0)));

        let conversion = converter.convert("deck.pdf", pdf_bytes()).await.unwrap();
        assert_eq!(conversion.status, ConversionStatus::Converted);
        assert_eq!(conversion.unreadable_pages, vec![2]);
    }

    #[tokio::test]
    async fn test_empty_document_without_ocr_is_error() {
        let converter = converter(vec!["", ""]);
        let err = converter.convert("scan.pdf", pdf_bytes()).await.unwrap_err();
        assert!(matches!(err, ConversionError::Empty));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_reports_reason() {
        let converter = DocumentConverter::new(
            Arc::new(FailingText),
            Arc::new(FakeRaster),
            ConverterConfig::default(),
        );
        let err = converter.convert("deck.pdf", pdf_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("bad xref"));
    }

    #[tokio::test]
    async fn test_format_detection() {
        let converter = converter(vec![]);

        let text = converter
            .convert("notes.txt", Arc::new(b"Fund terms\r\nLock: 1 year\0".to_vec()))
            .await
            .unwrap();
        assert_eq!(text.text, "Fund terms\nLock: 1 year");

        let err = converter
            .convert("sheet.xlsx", Arc::new(b"PK\x03\x04".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedFormat(ext) if ext == "xlsx"));

        let err = converter
            .convert("fake.pdf", Arc::new(b"hello".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Corrupt(_)));

        let err = converter
            .convert("latin1.txt", Arc::new(vec![0xff, 0xfe, 0x41]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Encoding(_)));
    }
}
