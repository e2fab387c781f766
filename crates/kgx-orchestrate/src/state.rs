//! Orchestrator state naming (spec.md §4.9). `orchestrator.rs`/`staged.rs`
//! are written as straight-line async functions, matching the teacher's
//! `rpg-lift::pipeline::run_pipeline` phase-by-phase style, rather than an
//! explicit transition table; this enum names the state under way at each
//! point in that straight-line flow and is stamped into the `state` field
//! of every `TraceEvent` payload `run_delta`/`run_pass`/`staged::run`
//! record, so trace consumers and tests can match on a state name instead
//! of re-deriving it from the event string.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Init,
    Chunking,
    Batching,
    Extracting,
    Normalizing,
    Merging,
    Projecting,
    Gating,
    Gleaning,
    Done,
    Fallback,
}

impl OrchestratorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Chunking => "chunking",
            Self::Batching => "batching",
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::Merging => "merging",
            Self::Projecting => "projecting",
            Self::Gating => "gating",
            Self::Gleaning => "gleaning",
            Self::Done => "done",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
