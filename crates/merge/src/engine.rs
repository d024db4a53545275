use crate::attribution::{Attribution, Offer};
use crate::error::MergeError;
use crate::investment::{Investment, InvestmentView};
use crate::normalizer::IdentityMatcher;
use crate::packet;
use crate::store::InvestmentStore;
use extract::{ExtractionResult, FieldName, Leader};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What one merge did to its investment.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub investment_id: Uuid,
    pub created: bool,
    /// Fields whose current value changed.
    pub fields_updated: Vec<FieldName>,
    /// Fields that only gained a history entry.
    pub fields_retained: Vec<FieldName>,
}

/// The document an extraction came from.
#[derive(Debug, Clone, Copy)]
pub struct MergeSource<'a> {
    pub document_id: Uuid,
    pub filename: &'a str,
}

/// Folds extraction results and manual edits into investment records.
pub struct MergeEngine {
    store: Arc<InvestmentStore>,
    matcher: IdentityMatcher,
    packets_dir: Option<PathBuf>,
}

impl MergeEngine {
    pub fn new(store: Arc<InvestmentStore>, matcher: IdentityMatcher) -> Self {
        Self {
            store,
            matcher,
            packets_dir: None,
        }
    }

    /// Write a markdown packet under `<dir>/packets/<tenant>/` after every change.
    pub fn with_packets(mut self, dir: impl Into<PathBuf>) -> Self {
        self.packets_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &Arc<InvestmentStore> {
        &self.store
    }

    /// Resolves the investment an extraction describes, creating one if needed,
    /// and offers every non-null field to its history.
    ///
    /// The tenant's resolution lock covers matching and, for a new investment,
    /// its first write; merges into an existing record only hold that record.
    pub async fn merge_extraction(
        &self,
        tenant: &str,
        source: MergeSource<'_>,
        result: &ExtractionResult,
    ) -> Result<MergeReport, MergeError> {
        let resolution = self.store.resolution_lock(tenant).await;

        let fields = &result.fields;
        let candidates = self.store.identities(tenant);
        let resolved = self
            .matcher
            .resolve(fields.firm_name(), fields.investment_name(), candidates.iter());

        let (investment, report) = match resolved {
            None => {
                let mut investment = Investment::new(tenant);
                let report = apply_extraction(&mut investment, true, source, result);
                investment.touch();
                // Indexed under its new name before other documents may resolve.
                self.store.insert(investment.clone()).await?;
                drop(resolution);
                info!(tenant, investment_id = %investment.id, "created investment");
                (investment, report)
            }
            Some(id) => {
                drop(resolution);
                let mut guard = self.store.lock(tenant, id).await?;
                let report = apply_extraction(&mut guard, false, source, result);
                self.store.commit(&mut guard).await?;
                (guard.clone(), report)
            }
        };
        self.refresh_packet(&investment).await;

        info!(
            tenant,
            investment_id = %report.investment_id,
            document_id = %source.document_id,
            updated = report.fields_updated.len(),
            retained = report.fields_retained.len(),
            "merged extraction"
        );
        Ok(report)
    }

    /// Records a user edit through the same precedence path as extractions.
    pub async fn apply_manual_edit(
        &self,
        tenant: &str,
        id: Uuid,
        field: FieldName,
        value: &Value,
        editor: &str,
    ) -> Result<InvestmentView, MergeError> {
        let mut investment = self.store.lock(tenant, id).await?;

        let offer = if field == FieldName::Leaders {
            let leaders = manual_leaders(value).ok_or_else(|| MergeError::InvalidField {
                field,
                reason: "expected a non-empty list of leaders".to_string(),
            })?;
            investment.fields.leaders.offer(Attribution::manual(leaders, editor))
        } else {
            let text = manual_text(value).ok_or_else(|| MergeError::InvalidField {
                field,
                reason: "expected a non-empty string".to_string(),
            })?;
            let history = investment.fields.text_mut(field).ok_or_else(|| MergeError::InvalidField {
                field,
                reason: "field is not editable".to_string(),
            })?;
            history.offer(Attribution::manual(text, editor))
        };

        self.store.commit(&mut investment).await?;
        self.refresh_packet(&investment).await;
        info!(tenant, investment_id = %id, %field, ?offer, "manual edit recorded");
        Ok(investment.view())
    }

    pub async fn archive(&self, tenant: &str, id: Uuid) -> Result<InvestmentView, MergeError> {
        let mut investment = self.store.lock(tenant, id).await?;
        if !investment.archived {
            investment.archived = true;
            self.store.commit(&mut investment).await?;
            self.refresh_packet(&investment).await;
        }
        Ok(investment.view())
    }

    async fn refresh_packet(&self, investment: &Investment) {
        let Some(dir) = &self.packets_dir else {
            return;
        };
        if let Err(e) = packet::write_packet(dir, investment).await {
            warn!(investment_id = %investment.id, error = %e, "failed to write packet");
        }
    }
}

fn apply_extraction(
    investment: &mut Investment,
    created: bool,
    source: MergeSource<'_>,
    result: &ExtractionResult,
) -> MergeReport {
    let fields = &result.fields;
    let mut report = MergeReport {
        investment_id: investment.id,
        created,
        fields_updated: Vec::new(),
        fields_retained: Vec::new(),
    };

    for field in FieldName::ALL {
        let outcome = if field == FieldName::Leaders {
            fields.leaders.as_ref().map(|extracted| {
                investment.fields.leaders.offer(Attribution::automatic(
                    extracted.value.clone(),
                    source.document_id,
                    source.filename,
                    extracted.confidence,
                    result.extracted_at,
                ))
            })
        } else {
            match (fields.text(field), investment.fields.text_mut(field)) {
                (Some(extracted), Some(history)) => Some(history.offer(Attribution::automatic(
                    extracted.value.clone(),
                    source.document_id,
                    source.filename,
                    extracted.confidence,
                    result.extracted_at,
                ))),
                _ => None,
            }
        };
        match outcome {
            Some(Offer::Current) => report.fields_updated.push(field),
            Some(Offer::Retained) => report.fields_retained.push(field),
            None => {}
        }
    }

    investment.link_document(source.document_id, source.filename);
    report
}

fn manual_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn manual_leaders(value: &Value) -> Option<Vec<Leader>> {
    let leaders: Vec<Leader> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) if !name.trim().is_empty() => Some(Leader::named(name.trim())),
                Value::Object(_) => serde_json::from_value::<Leader>(item.clone())
                    .ok()
                    .filter(|l| !l.name.trim().is_empty()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split('|')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(Leader::named)
            .collect(),
        _ => Vec::new(),
    };
    (!leaders.is_empty()).then_some(leaders)
}
