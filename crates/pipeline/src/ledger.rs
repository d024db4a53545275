use crate::error::PipelineError;
use crate::state::DocumentState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use extract::{ExtractionResult, TriageOutcome};
use ingest::{Conversion, DocumentKey, SourceDocument, Submission};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

const INTERRUPTED: &str = "interrupted before completion";

/// Everything the pipeline knows about one submitted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub tenant: String,
    /// Submission order within the ledger.
    pub seq: u64,
    pub document: SourceDocument,
    pub state: DocumentState,
    pub failure: Option<String>,
    pub triage: Option<TriageOutcome>,
    /// Every extraction ever made for this document, oldest first.
    pub extractions: Vec<ExtractionResult>,
    pub investment_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub document_id: Uuid,
    pub duplicate: bool,
}

/// Durable per-document state, deduplicated by (tenant, message id, checksum).
///
/// With a data directory each record is mirrored to `documents/<id>.json`,
/// the original bytes to `documents/<id>.bin` and converted text to
/// `documents/<id>.md`.
pub struct DocumentLedger {
    records: DashMap<Uuid, DocumentRecord>,
    keys: DashMap<(String, DocumentKey), Uuid>,
    next_seq: AtomicU64,
    dir: Option<PathBuf>,
}

impl DocumentLedger {
    pub fn in_memory() -> Self {
        Self {
            records: DashMap::new(),
            keys: DashMap::new(),
            next_seq: AtomicU64::new(0),
            dir: None,
        }
    }

    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let root = dir.as_ref().join("documents");
        tokio::fs::create_dir_all(&root).await?;
        let ledger = Self {
            dir: Some(root.clone()),
            ..Self::in_memory()
        };

        let mut max_seq = 0;
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mut record: DocumentRecord = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
            let raw_path = root.join(format!("{}.bin", record.document.id));
            if let Ok(bytes) = tokio::fs::read(&raw_path).await {
                record.document.raw = Arc::new(bytes);
            }
            if record.state.is_in_flight() {
                // The process stopped mid-document; the next run picks it up again.
                record.state = DocumentState::Failed;
                record.failure = Some(INTERRUPTED.to_string());
            }
            max_seq = max_seq.max(record.seq + 1);
            ledger
                .keys
                .insert((record.tenant.clone(), record.document.key.clone()), record.document.id);
            ledger.records.insert(record.document.id, record);
        }
        ledger.next_seq.store(max_seq, Ordering::SeqCst);

        info!(path = %root.display(), count = ledger.records.len(), "document ledger loaded");
        Ok(ledger)
    }

    /// Records a submission. An identical (message id, checksum) pair for the
    /// same tenant returns the existing document instead.
    pub async fn submit(&self, tenant: &str, submission: Submission) -> Result<Receipt, PipelineError> {
        let key = (tenant.to_string(), submission.key());
        let record = match self.keys.entry(key) {
            Entry::Occupied(existing) => {
                debug!(tenant, document_id = %existing.get(), "duplicate submission");
                return Ok(Receipt {
                    document_id: *existing.get(),
                    duplicate: true,
                });
            }
            Entry::Vacant(slot) => {
                let document = SourceDocument::new(submission);
                let record = DocumentRecord {
                    tenant: tenant.to_string(),
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    state: DocumentState::Pending,
                    failure: None,
                    triage: None,
                    extractions: Vec::new(),
                    investment_id: None,
                    updated_at: Utc::now(),
                    document,
                };
                slot.insert(record.document.id);
                self.records.insert(record.document.id, record.clone());
                record
            }
        };

        if let Some(dir) = &self.dir {
            let raw_path = dir.join(format!("{}.bin", record.document.id));
            tokio::fs::write(raw_path, record.document.raw.as_slice()).await?;
        }
        self.persist(&record).await?;
        info!(tenant, document_id = %record.document.id, filename = %record.document.filename, "document submitted");
        Ok(Receipt {
            document_id: record.document.id,
            duplicate: false,
        })
    }

    pub fn get(&self, id: Uuid) -> Option<DocumentRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn get_for_tenant(&self, tenant: &str, id: Uuid) -> Option<DocumentRecord> {
        self.get(id).filter(|r| r.tenant == tenant)
    }

    /// Runnable documents of a tenant in submission order.
    pub fn runnable(&self, tenant: &str) -> Vec<Uuid> {
        let mut found: Vec<(u64, Uuid)> = self
            .records
            .iter()
            .filter(|r| r.tenant == tenant && r.state.is_runnable())
            .map(|r| (r.seq, r.document.id))
            .collect();
        found.sort_unstable();
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// Marks a tenant's mid-pipeline documents as failed so the next run
    /// retries them. Only valid while no run for the tenant is live.
    pub async fn reclaim_interrupted(&self, tenant: &str) -> Result<usize, PipelineError> {
        let stranded: Vec<Uuid> = self
            .records
            .iter()
            .filter(|r| r.tenant == tenant && r.state.is_in_flight())
            .map(|r| r.document.id)
            .collect();
        for id in &stranded {
            self.fail(*id, INTERRUPTED).await?;
        }
        Ok(stranded.len())
    }

    pub fn count_in_state(&self, tenant: &str, state: DocumentState) -> usize {
        self.records
            .iter()
            .filter(|r| r.tenant == tenant && r.state == state)
            .count()
    }

    pub async fn transition(&self, id: Uuid, to: DocumentState) -> Result<(), PipelineError> {
        self.update(id, |record| {
            if !record.state.can_transition(to) {
                return Err(PipelineError::InvalidTransition {
                    id,
                    from: record.state,
                    to,
                });
            }
            record.state = to;
            if to != DocumentState::Failed {
                record.failure = None;
            }
            Ok(())
        })
        .await?
    }

    pub async fn fail(&self, id: Uuid, reason: impl Into<String>) -> Result<(), PipelineError> {
        let reason = reason.into();
        self.transition(id, DocumentState::Failed).await?;
        self.update(id, move |record| record.failure = Some(reason)).await
    }

    /// Converted text is written once; later conversions leave it untouched.
    pub async fn record_conversion(&self, id: Uuid, conversion: &Conversion) -> Result<(), PipelineError> {
        let stored = self
            .update(id, |record| record.document.record_conversion(conversion))
            .await?;
        if let (true, Some(dir)) = (stored, &self.dir) {
            tokio::fs::write(dir.join(format!("{id}.md")), &conversion.text).await?;
        }
        Ok(())
    }

    pub async fn record_conversion_failure(&self, id: Uuid, reason: &str) -> Result<(), PipelineError> {
        self.update(id, |record| record.document.record_conversion_failure(reason))
            .await
    }

    pub async fn record_triage(&self, id: Uuid, outcome: TriageOutcome) -> Result<(), PipelineError> {
        self.update(id, move |record| record.triage = Some(outcome)).await
    }

    pub async fn record_extraction(&self, id: Uuid, result: ExtractionResult) -> Result<(), PipelineError> {
        self.update(id, move |record| record.extractions.push(result)).await
    }

    pub async fn record_merge(&self, id: Uuid, investment_id: Uuid) -> Result<(), PipelineError> {
        self.update(id, move |record| record.investment_id = Some(investment_id))
            .await
    }

    async fn update<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut DocumentRecord) -> R,
    ) -> Result<R, PipelineError> {
        // The shard lock is released before any await.
        let (out, snapshot) = {
            let mut record = self
                .records
                .get_mut(&id)
                .ok_or(PipelineError::UnknownDocument(id))?;
            let out = f(&mut record);
            record.updated_at = Utc::now();
            (out, record.clone())
        };
        self.persist(&snapshot).await?;
        Ok(out)
    }

    async fn persist(&self, record: &DocumentRecord) -> Result<(), PipelineError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let id = record.document.id;
        let tmp = dir.join(format!("{id}.json.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, dir.join(format!("{id}.json"))).await?;
        Ok(())
    }
}
