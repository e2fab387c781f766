//! The orchestrator's public output type (spec.md §6 `ExtractionResult`).

use kgx_core::{MergedGraph, TraceEvent};
use kgx_extract::{MergeStats, NormalizerStats, ProjectionStats, QualityReport};
use serde_json::Value;

/// Stats bundle accompanying one [`ExtractionResult`] (spec.md §6 `stats`).
#[derive(Debug, Clone, Default)]
pub struct ExtractionStats {
    pub normalizer_stats: NormalizerStats,
    pub merge_stats: MergeStats,
    pub projection_stats: ProjectionStats,
    pub quality_gate: QualityReport,
    pub passes: usize,
}

/// Outcome of one [`crate::extract`] call. Always returned, even on a
/// fatal failure (spec.md §7 "never raise out of the orchestrator's
/// public call") — `errors` carries anything that went wrong along the
/// way, mirroring `rpg-lift::pipeline::LiftReport.errors`.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub tree: Value,
    pub graph: MergedGraph,
    pub stats: ExtractionStats,
    pub trace: Vec<TraceEvent>,
    pub errors: Vec<String>,
}

impl ExtractionResult {
    /// Built when a configuration problem (e.g. a cyclic schema) prevents
    /// the pipeline from running at all.
    pub fn fatal(details: impl Into<String>) -> Self {
        Self {
            tree: Value::Object(serde_json::Map::new()),
            graph: MergedGraph::new(),
            stats: ExtractionStats::default(),
            trace: Vec::new(),
            errors: vec![details.into()],
        }
    }

    /// True iff the quality gate passed and nothing was logged in `errors`.
    pub fn is_clean(&self) -> bool {
        self.stats.quality_gate.ok && self.errors.is_empty()
    }
}
