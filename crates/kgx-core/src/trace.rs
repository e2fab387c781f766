//! Append-only trace ring buffer (spec.md §3 `TraceEvent`, §5 "single writer
//! lock"). No direct teacher analog — the teacher reports progress via
//! `eprintln!` rather than a structured log — so this follows the same
//! mutex-guarded-shared-state idiom as [`crate::registry::NodeIdRegistry`].

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One recorded pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl TraceEvent {
    pub fn new(stage: impl Into<String>, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            stage: stage.into(),
            event: event.into(),
            payload,
        }
    }
}

/// A bounded, append-only ring buffer of [`TraceEvent`]s. Oldest events are
/// dropped once `capacity` is exceeded. A single mutex serializes writers;
/// readers snapshot the buffer by cloning.
pub struct TraceLog {
    capacity: usize,
    events: Mutex<VecDeque<TraceEvent>>,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(&self, event: TraceEvent) {
        let mut events = self.events.lock().expect("trace log mutex poisoned");
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot all currently retained events, oldest first.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .expect("trace log mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn contains_event(&self, name: &str) -> bool {
        self.events
            .lock()
            .expect("trace log mutex poisoned")
            .iter()
            .any(|e| e.event == name)
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("trace log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(1024)
    }
}
