use crate::attribution::{Attribution, FieldHistory, SourceType};
use crate::normalizer::Identity;
use chrono::{DateTime, Utc};
use extract::{Confidence, FieldName, Leader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-field attribution histories of one investment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestmentFields {
    pub investment_name: FieldHistory<String>,
    pub firm: FieldHistory<String>,
    pub strategy_description: FieldHistory<String>,
    pub leaders: FieldHistory<Vec<Leader>>,
    pub management_fees: FieldHistory<String>,
    pub incentive_fees: FieldHistory<String>,
    pub liquidity_lock: FieldHistory<String>,
    pub target_net_returns: FieldHistory<String>,
}

impl InvestmentFields {
    pub fn text(&self, field: FieldName) -> Option<&FieldHistory<String>> {
        match field {
            FieldName::InvestmentName => Some(&self.investment_name),
            FieldName::Firm => Some(&self.firm),
            FieldName::StrategyDescription => Some(&self.strategy_description),
            FieldName::Leaders => None,
            FieldName::ManagementFees => Some(&self.management_fees),
            FieldName::IncentiveFees => Some(&self.incentive_fees),
            FieldName::LiquidityLock => Some(&self.liquidity_lock),
            FieldName::TargetNetReturns => Some(&self.target_net_returns),
        }
    }

    pub fn text_mut(&mut self, field: FieldName) -> Option<&mut FieldHistory<String>> {
        match field {
            FieldName::InvestmentName => Some(&mut self.investment_name),
            FieldName::Firm => Some(&mut self.firm),
            FieldName::StrategyDescription => Some(&mut self.strategy_description),
            FieldName::Leaders => None,
            FieldName::ManagementFees => Some(&mut self.management_fees),
            FieldName::IncentiveFees => Some(&mut self.incentive_fees),
            FieldName::LiquidityLock => Some(&mut self.liquidity_lock),
            FieldName::TargetNetReturns => Some(&mut self.target_net_returns),
        }
    }

    /// Field view with history, or `None` when the field has never had a value.
    pub fn view(&self, field: FieldName) -> Option<FieldView> {
        match field {
            FieldName::Leaders => FieldView::from_history(&self.leaders),
            other => self.text(other).and_then(FieldView::from_history),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub document_id: Uuid,
    pub filename: String,
    pub linked_at: DateTime<Utc>,
}

/// Canonical record for one investment opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investment {
    pub id: Uuid,
    pub tenant: String,
    pub fields: InvestmentFields,
    pub documents: Vec<DocumentLink>,
    pub archived: bool,
    /// Bumped on every committed change.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn new(tenant: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            fields: InvestmentFields::default(),
            documents: Vec::new(),
            archived: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.investment_name.value().map(String::as_str)
    }

    pub fn firm(&self) -> Option<&str> {
        self.fields.firm.value().map(String::as_str)
    }

    pub fn leaders(&self) -> &[Leader] {
        self.fields.leaders.value().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn text_value(&self, field: FieldName) -> Option<&str> {
        self.fields.text(field).and_then(|h| h.value()).map(String::as_str)
    }

    /// Idempotent per document.
    pub fn link_document(&mut self, document_id: Uuid, filename: &str) -> bool {
        if self.documents.iter().any(|d| d.document_id == document_id) {
            return false;
        }
        self.documents.push(DocumentLink {
            document_id,
            filename: filename.to_string(),
            linked_at: Utc::now(),
        });
        true
    }

    pub fn source_count(&self) -> usize {
        self.documents.len()
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            tenant: self.tenant.clone(),
            firm: self.firm().map(String::from),
            name: self.name().map(String::from),
            created_at: self.created_at,
        }
    }

    /// Case-insensitive substring search over name, firm, strategy and leader names.
    pub fn matches_search(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let hit = |s: Option<&str>| s.is_some_and(|v| v.to_lowercase().contains(&needle));
        hit(self.name())
            || hit(self.firm())
            || hit(self.text_value(FieldName::StrategyDescription))
            || self.leaders().iter().any(|l| hit(Some(&l.name)))
    }

    pub fn view(&self) -> InvestmentView {
        let mut values = BTreeMap::new();
        let mut fields = BTreeMap::new();
        for field in FieldName::ALL {
            if let Some(view) = self.fields.view(field) {
                values.insert(field, view.value.clone());
                fields.insert(field, view);
            } else {
                values.insert(field, Value::Null);
            }
        }

        InvestmentView {
            id: self.id,
            tenant: self.tenant.clone(),
            values,
            fields,
            documents: self.documents.clone(),
            source_count: self.source_count(),
            archived: self.archived,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// One history entry as shown to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueView {
    pub value: Value,
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub source_name: String,
    pub confidence: Confidence,
    pub extracted_at: DateTime<Utc>,
}

impl ValueView {
    fn from_attribution<T: Serialize>(a: &Attribution<T>) -> Self {
        Self {
            value: serde_json::to_value(&a.value).unwrap_or(Value::Null),
            source_type: a.source_type,
            source_id: a.source_id,
            source_name: a.source_name.clone(),
            confidence: a.confidence,
            extracted_at: a.extracted_at,
        }
    }
}

/// Current attribution of a field plus every value it has ever had, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldView {
    #[serde(flatten)]
    pub current: ValueView,
    pub all_values: Vec<ValueView>,
}

impl std::ops::Deref for FieldView {
    type Target = ValueView;

    fn deref(&self) -> &ValueView {
        &self.current
    }
}

impl FieldView {
    fn from_history<T: Serialize>(history: &FieldHistory<T>) -> Option<Self> {
        let current = history.current()?;
        Some(Self {
            current: ValueView::from_attribution(current),
            all_values: history.history().iter().rev().map(ValueView::from_attribution).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentView {
    pub id: Uuid,
    pub tenant: String,
    pub values: BTreeMap<FieldName, Value>,
    pub fields: BTreeMap<FieldName, FieldView>,
    pub documents: Vec<DocumentLink>,
    pub source_count: usize,
    pub archived: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
