use chrono::{DateTime, Utc};
use extract::Confidence;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Automatic,
    Manual,
}

/// One recorded value for one field, with where it came from.
///
/// Generic over the value so scalar text fields and the structured leader
/// list share the precedence logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution<T> {
    pub value: T,
    pub source_type: SourceType,
    /// Source document for automatic values; `None` for manual edits.
    pub source_id: Option<Uuid>,
    pub source_name: String,
    pub confidence: Confidence,
    pub extracted_at: DateTime<Utc>,
}

impl<T> Attribution<T> {
    pub fn automatic(
        value: T,
        source_id: Uuid,
        source_name: impl Into<String>,
        confidence: Confidence,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            source_type: SourceType::Automatic,
            source_id: Some(source_id),
            source_name: source_name.into(),
            confidence,
            extracted_at,
        }
    }

    /// Manual values always carry the top confidence level.
    pub fn manual(value: T, editor: impl Into<String>) -> Self {
        Self {
            value,
            source_type: SourceType::Manual,
            source_id: None,
            source_name: editor.into(),
            confidence: Confidence::Verified,
            extracted_at: Utc::now(),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.source_type == SourceType::Manual
    }

    /// Whether `self` should replace `current` as the field's current value.
    ///
    /// A manual current value only yields to another manual value. Otherwise the
    /// newcomer needs strictly higher confidence, or equal confidence and a
    /// strictly later timestamp; an exact tie keeps the incumbent.
    pub fn supersedes(&self, current: &Attribution<T>) -> bool {
        if current.is_manual() {
            return self.is_manual();
        }
        self.confidence > current.confidence
            || (self.confidence == current.confidence && self.extracted_at > current.extracted_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Appended and made current.
    Current,
    /// Appended to history only.
    Retained,
}

/// Append-only history for one field plus a pointer at its current entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct FieldHistory<T> {
    current: Option<usize>,
    history: Vec<Attribution<T>>,
}

impl<T> Default for FieldHistory<T> {
    fn default() -> Self {
        Self {
            current: None,
            history: Vec::new(),
        }
    }
}

impl<T> FieldHistory<T> {
    /// Every offer is recorded; only a superseding one moves the current pointer.
    pub fn offer(&mut self, attribution: Attribution<T>) -> Offer {
        let becomes_current = match self.current() {
            Some(current) => attribution.supersedes(current),
            None => true,
        };
        self.history.push(attribution);
        if becomes_current {
            self.current = Some(self.history.len() - 1);
            Offer::Current
        } else {
            Offer::Retained
        }
    }

    pub fn current(&self) -> Option<&Attribution<T>> {
        self.current.and_then(|i| self.history.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn value(&self) -> Option<&T> {
        self.current().map(|a| &a.value)
    }

    /// Oldest first, in the order values arrived.
    pub fn history(&self) -> &[Attribution<T>] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
