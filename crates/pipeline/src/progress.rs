use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const STEP_COMPLETE: &str = "complete";
pub const STEP_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step: String,
    pub message: String,
    pub details: Map<String, Value>,
    #[serde(serialize_with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

fn iso8601<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl ProgressEvent {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// `complete` and `error` end a run's stream.
    pub fn is_terminal(&self) -> bool {
        self.step == STEP_COMPLETE || self.step == STEP_ERROR
    }

    /// Server-sent-events frame: `data: {json}\n\n`.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {json}\n\n")
    }
}

struct TrackerInner {
    events: Vec<ProgressEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    finished: bool,
}

/// Ordered event log of one batch run, fanned out to live subscribers.
///
/// Emission and subscription share one lock, so a subscriber sees the full
/// replay followed by every later event with no gaps or reordering.
/// Dropping a receiver never affects the run.
pub struct ProgressTracker {
    run_id: Uuid,
    tenant: String,
    inner: Mutex<TrackerInner>,
}

impl ProgressTracker {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tenant: tenant.into(),
            inner: Mutex::new(TrackerInner {
                events: Vec::new(),
                subscribers: Vec::new(),
                finished: false,
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.finished {
            return;
        }
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if event.is_terminal() {
            inner.finished = true;
            // Closing the senders ends every stream after its last event.
            inner.subscribers.clear();
        }
        inner.events.push(event);
    }

    /// Receiver that replays past events and then follows the run.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            for event in &inner.events {
                let _ = tx.send(event.clone());
            }
            if !inner.finished {
                inner.subscribers.push(tx);
            }
        }
        rx
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.inner.lock().map(|i| i.events.clone()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().map(|i| i.finished).unwrap_or(true)
    }
}
