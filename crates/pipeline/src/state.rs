use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one document inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Converting,
    Triaging,
    Extracting,
    Enriching,
    Merging,
    Done,
    /// Triage judged the document irrelevant.
    Skipped,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Converting => "converting",
            DocumentState::Triaging => "triaging",
            DocumentState::Extracting => "extracting",
            DocumentState::Enriching => "enriching",
            DocumentState::Merging => "merging",
            DocumentState::Done => "done",
            DocumentState::Skipped => "skipped",
            DocumentState::Failed => "failed",
        }
    }

    /// Done and skipped documents are never processed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Done | DocumentState::Skipped)
    }

    /// Pending and failed documents are picked up by the next run.
    pub fn is_runnable(&self) -> bool {
        matches!(self, DocumentState::Pending | DocumentState::Failed)
    }

    /// Between pickup and a terminal or runnable state.
    pub fn is_in_flight(&self) -> bool {
        !self.is_runnable() && !self.is_terminal()
    }

    pub fn can_transition(&self, to: DocumentState) -> bool {
        use DocumentState::*;
        match (self, to) {
            (Pending | Failed, Converting) => true,
            (Converting, Triaging) => true,
            (Triaging, Extracting | Skipped) => true,
            (Extracting, Enriching | Merging) => true,
            (Enriching, Merging) => true,
            (Merging, Done) => true,
            (from, Failed) => !from.is_terminal() && *from != Failed,
            _ => false,
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
