use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Convert,
    Triage,
    Extract,
    Enrich,
    Merge,
}

#[derive(Default)]
struct StageTiming {
    total_us: AtomicU64,
    count: AtomicUsize,
}

impl StageTiming {
    fn record(&self, duration: Duration) {
        self.total_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn avg_ms(&self) -> f64 {
        let total = self.total_us.load(Ordering::Relaxed) as f64;
        let count = self.count.load(Ordering::Relaxed) as f64;
        if count > 0.0 {
            total / count / 1000.0
        } else {
            0.0
        }
    }
}

/// Process-wide pipeline counters.
#[derive(Default)]
pub struct Metrics {
    batches_started: AtomicUsize,
    batches_aborted: AtomicUsize,
    documents_processed: AtomicUsize,
    documents_succeeded: AtomicUsize,
    documents_skipped: AtomicUsize,
    documents_failed: AtomicUsize,
    ocr_fallbacks: AtomicUsize,
    extraction_retries: AtomicUsize,
    enrichment_failures: AtomicUsize,

    convert: StageTiming,
    triage: StageTiming,
    extract: StageTiming,
    enrich: StageTiming,
    merge: StageTiming,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_batch(&self, aborted: bool) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
        if aborted {
            self.batches_aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_succeeded(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ocr_fallback(&self) {
        self.ocr_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_retries(&self, retries: u32) {
        self.extraction_retries.fetch_add(retries as usize, Ordering::Relaxed);
    }

    pub fn record_enrichment_failure(&self) {
        self.enrichment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        let timing = match stage {
            Stage::Convert => &self.convert,
            Stage::Triage => &self.triage,
            Stage::Extract => &self.extract,
            Stage::Enrich => &self.enrich,
            Stage::Merge => &self.merge,
        };
        timing.record(duration);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_started: self.batches_started.load(Ordering::Relaxed),
            batches_aborted: self.batches_aborted.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_succeeded: self.documents_succeeded.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            ocr_fallbacks: self.ocr_fallbacks.load(Ordering::Relaxed),
            extraction_retries: self.extraction_retries.load(Ordering::Relaxed),
            enrichment_failures: self.enrichment_failures.load(Ordering::Relaxed),
            avg_convert_time_ms: self.convert.avg_ms(),
            avg_triage_time_ms: self.triage.avg_ms(),
            avg_extract_time_ms: self.extract.avg_ms(),
            avg_enrich_time_ms: self.enrich.avg_ms(),
            avg_merge_time_ms: self.merge.avg_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_started: usize,
    pub batches_aborted: usize,
    pub documents_processed: usize,
    pub documents_succeeded: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub ocr_fallbacks: usize,
    pub extraction_retries: usize,
    pub enrichment_failures: usize,
    pub avg_convert_time_ms: f64,
    pub avg_triage_time_ms: f64,
    pub avg_extract_time_ms: f64,
    pub avg_enrich_time_ms: f64,
    pub avg_merge_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
