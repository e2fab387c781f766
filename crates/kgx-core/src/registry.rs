//! Node identity registry (C3): assigns stable [`NodeId`]s from
//! `(class_name, identity_field_values)` fingerprints, shared across batches
//! (spec.md §4.3, §5).

use std::collections::HashMap;
use std::sync::Mutex;

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

/// `(path, canonical_ids_tuple)` — identifies a node across batches
/// (spec.md §3). `ids` is ordered per `PathCatalog::id_fields_by_path[path]`,
/// already string-coerced, trimmed, and NFC-normalized by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeFingerprint {
    pub path: String,
    pub ids: Vec<(String, String)>,
}

impl NodeFingerprint {
    pub fn new(path: impl Into<String>, ids: Vec<(String, String)>) -> Self {
        Self {
            path: path.into(),
            ids,
        }
    }

    /// Deterministic byte serialization fed to the hash. Field separators are
    /// control characters unlikely to appear in identity values so two
    /// distinct fingerprints never collide on encoding alone.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.path.as_bytes());
        buf.push(0x00);
        for (k, v) in &self.ids {
            buf.extend_from_slice(k.as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(v.as_bytes());
            buf.push(0x1e);
        }
        buf
    }
}

/// Deterministic, content-addressed node identifier:
/// `class_name_` + first 12 hex characters of `blake2b(fingerprint_bytes)`
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistics returned by [`NodeIdRegistry::stats`]: a total entity count plus
/// a per-class breakdown, matching the shape the original project's
/// `get_stats()` asserts (`{total_entities, classes}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_entities: usize,
    pub classes: Vec<(String, usize)>,
}

#[derive(Default)]
struct RegistryInner {
    fingerprint_to_id: HashMap<NodeFingerprint, NodeId>,
    id_to_fingerprint: HashMap<NodeId, NodeFingerprint>,
    seen_classes: std::collections::BTreeMap<String, usize>,
}

/// Content-addressed node identity registry, safe under concurrent batch
/// processing (spec.md §5): `assign` is a check-then-insert under a mutex, so
/// readers during writes observe either the old or the new binding, never a
/// torn intermediate.
#[derive(Default)]
pub struct NodeIdRegistry {
    inner: Mutex<RegistryInner>,
}

impl NodeIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (or return the existing) [`NodeId`] for `fingerprint`. Pure
    /// function of `(class_name, fingerprint)`: identical inputs always
    /// derive the identical ID, across registries and across processes.
    pub fn assign(&self, class_name: &str, fingerprint: NodeFingerprint) -> NodeId {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(existing) = inner.fingerprint_to_id.get(&fingerprint) {
            return existing.clone();
        }
        let id = Self::derive_id(class_name, &fingerprint);
        inner
            .fingerprint_to_id
            .insert(fingerprint.clone(), id.clone());
        inner.id_to_fingerprint.insert(id.clone(), fingerprint);
        *inner.seen_classes.entry(class_name.to_string()).or_insert(0) += 1;
        id
    }

    /// Look up a previously assigned ID without inserting one.
    pub fn lookup(&self, fingerprint: &NodeFingerprint) -> Option<NodeId> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .fingerprint_to_id
            .get(fingerprint)
            .cloned()
    }

    /// The fingerprint that produced `id`, if any.
    pub fn fingerprint_of(&self, id: &NodeId) -> Option<NodeFingerprint> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .id_to_fingerprint
            .get(id)
            .cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        RegistryStats {
            total_entities: inner.fingerprint_to_id.len(),
            classes: inner.seen_classes.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn derive_id(class_name: &str, fingerprint: &NodeFingerprint) -> NodeId {
        let mut hasher = Blake2b512::new();
        hasher.update(fingerprint.to_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        NodeId(format!("{class_name}_{}", &hex[..12]))
    }
}
