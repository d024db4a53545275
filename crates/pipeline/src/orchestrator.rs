use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ledger::{DocumentLedger, Receipt};
use crate::metrics::{Metrics, MetricsSnapshot, Stage, TimedOperation};
use crate::progress::{ProgressEvent, ProgressTracker, STEP_COMPLETE, STEP_ERROR};
use crate::retry::RetryPolicy;
use crate::runs::{RunGuard, RunRegistry};
use crate::state::DocumentState;
use chrono::{DateTime, Utc};
use extract::{Classifier, Enricher, ExtractionResult, Extractor, StageError, TriageSignals, triage};
use ingest::{ConversionStatus, DocumentConverter, Submission};
use merge::{IdentityMatcher, InvestmentStore, MergeEngine, MergeReport, MergeSource};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The pluggable stage implementations a pipeline runs with.
pub struct Stages {
    pub converter: Arc<DocumentConverter>,
    pub classifier: Arc<dyn Classifier>,
    pub extractor: Arc<dyn Extractor>,
    pub enricher: Option<Arc<dyn Enricher>>,
}

/// Outcome of one batch run, returned to the caller that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub tenant: String,
    /// Documents queued for this run.
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Documents already done before the run began.
    pub already_done: usize,
    pub investments_created: usize,
    pub investments_updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

enum DocumentOutcome {
    Merged(MergeReport),
    Skipped,
    Failed,
}

struct DocContext {
    id: Uuid,
    filename: String,
    index: usize,
    total: usize,
}

impl DocContext {
    fn event(&self, state: DocumentState, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(state.as_str(), message)
            .with("document_id", self.id.to_string())
            .with("filename", self.filename.clone())
            .with("index", self.index)
            .with("total", self.total)
    }
}

/// Drives documents through convert, triage, extract, enrich and merge.
///
/// The orchestrator is the only writer of document state. Documents within a
/// run are processed one at a time and a tenant has at most one active run.
pub struct Orchestrator {
    config: PipelineConfig,
    stages: Stages,
    ledger: Arc<DocumentLedger>,
    merge: Arc<MergeEngine>,
    runs: RunRegistry,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        stages: Stages,
        ledger: Arc<DocumentLedger>,
        merge: Arc<MergeEngine>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            stages,
            ledger,
            merge,
            runs: RunRegistry::new(),
            metrics: Metrics::new(),
            retry,
        }
    }

    /// Builds ledger, investment store and merge engine from the storage config.
    pub async fn open(config: PipelineConfig, stages: Stages) -> Result<Self, PipelineError> {
        let matcher = IdentityMatcher::new(
            config.matching.similarity_threshold,
            config.matching.firm_weight,
        );

        let (ledger, merge) = match &config.storage.data_dir {
            Some(dir) => {
                let ledger = DocumentLedger::open(dir).await?;
                let store = InvestmentStore::open(dir, config.lock_timeout()).await?;
                let engine = MergeEngine::new(Arc::new(store), matcher).with_packets(dir.clone());
                (ledger, engine)
            }
            None => {
                let store = InvestmentStore::in_memory(config.lock_timeout());
                (DocumentLedger::in_memory(), MergeEngine::new(Arc::new(store), matcher))
            }
        };

        Ok(Self::new(config, stages, Arc::new(ledger), Arc::new(merge)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<DocumentLedger> {
        &self.ledger
    }

    pub fn merge_engine(&self) -> &Arc<MergeEngine> {
        &self.merge
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn submit(&self, tenant: &str, submission: Submission) -> Result<Receipt, PipelineError> {
        self.ledger.submit(tenant, submission).await
    }

    /// Claims the tenant's run slot without starting work, so callers can
    /// subscribe to progress before the first event.
    pub fn start_run(&self, tenant: &str) -> Result<RunGuard, PipelineError> {
        self.runs.try_start(tenant)
    }

    pub async fn run_batch(&self, tenant: &str) -> Result<BatchSummary, PipelineError> {
        let run = self.start_run(tenant)?;
        self.execute(run).await
    }

    /// Processes every runnable document of the run's tenant in submission order.
    pub async fn execute(&self, run: RunGuard) -> Result<BatchSummary, PipelineError> {
        let tracker = Arc::clone(run.tracker());
        let tenant = run.tenant().to_string();
        // The guard excludes any other live run for this tenant, so whatever
        // is still mid-pipeline was left behind by an abandoned run.
        let reclaimed = self.ledger.reclaim_interrupted(&tenant).await?;
        if reclaimed > 0 {
            warn!(tenant = %tenant, reclaimed, "reclaimed documents from an interrupted run");
        }
        let queue = self.ledger.runnable(&tenant);

        let mut summary = BatchSummary {
            run_id: tracker.run_id(),
            tenant: tenant.clone(),
            total: queue.len(),
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            already_done: self.ledger.count_in_state(&tenant, DocumentState::Done),
            investments_created: 0,
            investments_updated: 0,
            started_at: Utc::now(),
            finished_at: None,
        };

        info!(tenant = %tenant, run_id = %summary.run_id, queued = summary.total, "batch started");
        tracker.emit(
            ProgressEvent::new("start", format!("Processing {} documents", summary.total))
                .with("run_id", summary.run_id.to_string())
                .with("total", summary.total)
                .with("already_done", summary.already_done),
        );

        for (index, id) in queue.into_iter().enumerate() {
            let outcome = self
                .process_document(&tenant, id, &tracker, index + 1, summary.total)
                .await;

            match outcome {
                Ok(outcome) => {
                    summary.processed += 1;
                    match outcome {
                        DocumentOutcome::Merged(report) => {
                            summary.succeeded += 1;
                            if report.created {
                                summary.investments_created += 1;
                            } else {
                                summary.investments_updated += 1;
                            }
                        }
                        DocumentOutcome::Skipped => summary.skipped += 1,
                        DocumentOutcome::Failed => summary.failed += 1,
                    }
                }
                Err(e) => {
                    error!(tenant = %tenant, document_id = %id, error = %e, "batch aborted");
                    self.metrics.record_batch(true);
                    drop(run);
                    tracker.emit(
                        ProgressEvent::new(STEP_ERROR, e.to_string())
                            .with("processed", summary.processed)
                            .with("failed", summary.failed),
                    );
                    return Err(e);
                }
            }
        }

        summary.finished_at = Some(Utc::now());
        self.metrics.record_batch(false);
        info!(
            tenant = %tenant,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch complete"
        );

        drop(run);
        tracker.emit(
            ProgressEvent::new(
                STEP_COMPLETE,
                format!(
                    "Processed {} documents: {} succeeded, {} skipped, {} failed",
                    summary.processed, summary.succeeded, summary.skipped, summary.failed
                ),
            )
            .with("summary", serde_json::to_value(&summary).unwrap_or_default()),
        );
        Ok(summary)
    }

    async fn advance(
        &self,
        tracker: &ProgressTracker,
        doc: &DocContext,
        to: DocumentState,
        event: ProgressEvent,
    ) -> Result<(), PipelineError> {
        self.ledger.transition(doc.id, to).await?;
        tracker.emit(event);
        Ok(())
    }

    async fn fail(
        &self,
        tracker: &ProgressTracker,
        doc: &DocContext,
        reason: String,
    ) -> Result<DocumentOutcome, PipelineError> {
        warn!(document_id = %doc.id, filename = %doc.filename, reason = %reason, "document failed");
        self.ledger.fail(doc.id, reason.clone()).await?;
        self.metrics.record_failed();
        tracker.emit(
            doc.event(DocumentState::Failed, format!("Failed {}", doc.filename))
                .with("reason", reason),
        );
        Ok(DocumentOutcome::Failed)
    }

    /// Errors returned here are infrastructure failures; everything
    /// document-specific ends as a `Failed` outcome.
    async fn process_document(
        &self,
        tenant: &str,
        id: Uuid,
        tracker: &ProgressTracker,
        index: usize,
        total: usize,
    ) -> Result<DocumentOutcome, PipelineError> {
        let record = self.ledger.get(id).ok_or(PipelineError::UnknownDocument(id))?;
        let document = record.document;
        let doc = DocContext {
            id,
            filename: document.filename.clone(),
            index,
            total,
        };
        let timeout = self.config.stage_timeout();

        // Convert
        self.advance(
            tracker,
            &doc,
            DocumentState::Converting,
            doc.event(DocumentState::Converting, format!("Converting {}", doc.filename)),
        )
        .await?;

        let text = match document.converted_text.clone() {
            Some(text) => text,
            None => {
                let timer = TimedOperation::start();
                let converted = self
                    .stages
                    .converter
                    .convert(&document.filename, Arc::clone(&document.raw))
                    .await;
                self.metrics.record_stage(Stage::Convert, timer.elapsed());

                match converted {
                    Ok(conversion) => {
                        if conversion.status == ConversionStatus::OcrUsed {
                            self.metrics.record_ocr_fallback();
                        }
                        self.ledger.record_conversion(id, &conversion).await?;
                        conversion.text
                    }
                    Err(e) => {
                        self.ledger.record_conversion_failure(id, &e.to_string()).await?;
                        return self.fail(tracker, &doc, format!("conversion failed: {e}")).await;
                    }
                }
            }
        };

        // Triage
        self.advance(
            tracker,
            &doc,
            DocumentState::Triaging,
            doc.event(DocumentState::Triaging, format!("Classifying {}", doc.filename))
                .with("text_length", text.len()),
        )
        .await?;

        let signals = TriageSignals::new(
            document.filename.clone(),
            document.subject.clone(),
            document.sender.clone(),
            &text,
            self.config.extraction.excerpt_chars,
        );
        let timer = TimedOperation::start();
        let verdict = self
            .retry
            .run("triage", timeout, || {
                triage::decide(self.stages.classifier.as_ref(), &signals, &text)
            })
            .await;
        self.metrics.record_stage(Stage::Triage, timer.elapsed());

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                let err = StageError::Triage(e.to_string());
                return self.fail(tracker, &doc, err.to_string()).await;
            }
        };
        self.ledger.record_triage(id, verdict.clone()).await?;

        if !verdict.relevant {
            self.advance(
                tracker,
                &doc,
                DocumentState::Skipped,
                doc.event(DocumentState::Skipped, format!("Skipped {}: not investment material", doc.filename))
                    .with("rationale", verdict.rationale.clone()),
            )
            .await?;
            self.metrics.record_skipped();
            return Ok(DocumentOutcome::Skipped);
        }

        // Extract
        self.advance(
            tracker,
            &doc,
            DocumentState::Extracting,
            doc.event(DocumentState::Extracting, format!("Extracting fields from {}", doc.filename))
                .with("escalated", verdict.escalated),
        )
        .await?;

        let timer = TimedOperation::start();
        let extraction = self
            .retry
            .run("extraction", timeout, || self.stages.extractor.extract(&text))
            .await;
        self.metrics.record_stage(Stage::Extract, timer.elapsed());

        let extraction = match extraction {
            Ok(extraction) => extraction,
            Err(e) => return self.fail(tracker, &doc, format!("extraction failed: {e}")).await,
        };
        self.metrics
            .record_extraction_retries(extraction.attempts.saturating_sub(1));
        let mut fields = extraction.fields;

        // Enrich
        let leaders = fields
            .leaders
            .as_ref()
            .map(|l| l.value.clone())
            .unwrap_or_default();
        let mut enrichment_error = None;

        if let (true, Some(enricher), false) = (
            self.config.enrichment_enabled,
            &self.stages.enricher,
            leaders.is_empty(),
        ) {
            self.advance(
                tracker,
                &doc,
                DocumentState::Enriching,
                doc.event(DocumentState::Enriching, format!("Looking up {} leaders", leaders.len())),
            )
            .await?;

            let firm = fields.firm_name().map(str::to_string);
            let timer = TimedOperation::start();
            let enriched = self
                .retry
                .run("enrichment", timeout, || enricher.enrich(&leaders, firm.as_deref()))
                .await;
            self.metrics.record_stage(Stage::Enrich, timer.elapsed());

            match enriched {
                Ok(enriched) if enriched.len() == leaders.len() => {
                    if let Some(slot) = fields.leaders.as_mut() {
                        slot.value = enriched;
                    }
                }
                Ok(enriched) => {
                    warn!(document_id = %id, expected = leaders.len(), got = enriched.len(), "enrichment changed leader count, ignoring");
                }
                Err(e) => {
                    // Enrichment never blocks the merge.
                    warn!(document_id = %id, error = %e, "enrichment failed");
                    self.metrics.record_enrichment_failure();
                    enrichment_error = Some(e.to_string());
                }
            }
        } else {
            let reason = if !self.config.enrichment_enabled || self.stages.enricher.is_none() {
                "enrichment disabled"
            } else {
                "no leaders extracted"
            };
            self.advance(
                tracker,
                &doc,
                DocumentState::Enriching,
                doc.event(DocumentState::Enriching, format!("Skipping enrichment for {}", doc.filename))
                    .with("skipped", true)
                    .with("reason", reason),
            )
            .await?;
        }

        let result = ExtractionResult::new(id, fields, extraction.model, extraction.attempts);
        self.ledger.record_extraction(id, result.clone()).await?;

        // Merge
        let mut merging = doc
            .event(DocumentState::Merging, format!("Merging {}", doc.filename))
            .with("fields_found", result.fields.found_count());
        if let Some(err) = &enrichment_error {
            merging = merging.with("enrichment_error", err.clone());
        }
        self.advance(tracker, &doc, DocumentState::Merging, merging).await?;

        let timer = TimedOperation::start();
        let merged = self
            .merge
            .merge_extraction(
                tenant,
                MergeSource {
                    document_id: id,
                    filename: &doc.filename,
                },
                &result,
            )
            .await;
        self.metrics.record_stage(Stage::Merge, timer.elapsed());

        let report = match merged {
            Ok(report) => report,
            Err(e) if e.is_infrastructure() => {
                if let Err(ledger_err) = self.ledger.fail(id, format!("merge failed: {e}")).await {
                    warn!(document_id = %id, error = %ledger_err, "could not record merge failure");
                }
                self.metrics.record_failed();
                return Err(e.into());
            }
            Err(e) => return self.fail(tracker, &doc, format!("merge failed: {e}")).await,
        };

        self.ledger.record_merge(id, report.investment_id).await?;
        self.advance(
            tracker,
            &doc,
            DocumentState::Done,
            doc.event(DocumentState::Done, format!("Finished {}", doc.filename))
                .with("investment_id", report.investment_id.to_string())
                .with("created", report.created)
                .with("fields_updated", report.fields_updated.len())
                .with("fields_retained", report.fields_retained.len()),
        )
        .await?;
        self.metrics.record_succeeded();

        info!(tenant, document_id = %id, investment_id = %report.investment_id, "document done");
        Ok(DocumentOutcome::Merged(report))
    }
}
