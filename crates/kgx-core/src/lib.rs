//! Core types shared across the kgx extraction pipeline.
//!
//! Provides the schema catalog ([`catalog::PathCatalog`]), the content-addressed
//! node identity registry ([`registry::NodeIdRegistry`]), the merged-graph arena
//! ([`graph::MergedGraph`]), pipeline configuration, the error taxonomy, and the
//! append-only trace log.

pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod registry;
pub mod trace;

pub use catalog::{PathCatalog, Schema, SchemaClass, SchemaField, SchemaFieldKind};
pub use config::{ExtractionConfig, ResolverMode};
pub use error::CoreError;
pub use graph::{Edge, MergedGraph, Node, PendingParent};
pub use registry::{NodeFingerprint, NodeId, NodeIdRegistry, RegistryStats};
pub use trace::{TraceEvent, TraceLog};
