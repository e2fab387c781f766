//! The Graph Merger's dedup policy (spec.md §4.6): how conflicting
//! property values for the same fingerprint are reconciled.

use std::collections::HashSet;

use serde_json::Value;

/// Per-extraction dedup configuration. Identity fields always agree by
/// construction (fingerprint equality); this governs everything else.
#[derive(Debug, Clone, Default)]
pub struct DedupPolicy {
    /// Properties where *last-wins* replaces the default
    /// *first-non-empty-wins* precedence (spec.md §4.6 "a per-path
    /// override may select last-wins for properties marked volatile").
    volatile_properties: HashSet<String>,
}

impl DedupPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volatile_properties(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.volatile_properties.extend(fields);
        self
    }

    fn is_volatile(&self, field: &str) -> bool {
        self.volatile_properties.contains(field)
    }

    /// Merges `incoming` onto `existing` in place. Returns `true` if the
    /// merge overwrote a differing, non-empty existing value (a
    /// property conflict).
    pub fn merge_property(&self, field: &str, existing: &mut Value, incoming: Value) -> bool {
        if let (Value::Array(existing_items), Value::Array(incoming_items)) = (&mut *existing, &incoming) {
            for item in incoming_items {
                if !existing_items.contains(item) {
                    existing_items.push(item.clone());
                }
            }
            return false;
        }

        if self.is_volatile(field) {
            let differs = !is_empty(existing) && *existing != incoming;
            *existing = incoming;
            return differs;
        }

        if is_empty(existing) {
            *existing = incoming;
            return false;
        }

        if *existing != incoming && !is_empty(&incoming) {
            return true;
        }

        false
    }
}

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}
