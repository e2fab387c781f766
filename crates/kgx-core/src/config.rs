//! Configuration for the extraction pipeline.
//!
//! Load order: `kgx.toml` in the project root → environment variables →
//! defaults, mirroring the teacher's `RpgConfig::load` shape.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level pipeline configuration (spec.md §6 config surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub contract: ExtractionContract,
    pub batching: BatchingConfig,
    pub delta: DeltaConfig,
    pub staged: StagedConfig,
    pub gleaning: GleaningConfig,
    pub completer: CompleterConfig,
}

/// `extraction_contract`: which of the three flows `kgx-orchestrate` drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionContract {
    Delta,
    Staged,
    Direct,
}

impl Default for ExtractionContract {
    fn default() -> Self {
        Self::Delta
    }
}

/// Chunk batching knobs (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Token budget per batch.
    pub chunk_max_tokens: usize,
    /// Tail-merge ratio: a trailing batch smaller than
    /// `merge_threshold * chunk_max_tokens` is folded into its predecessor.
    pub merge_threshold: f64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: 512,
            merge_threshold: 0.85,
        }
    }
}

/// `delta_resolvers_mode`: how aggressively the normalizer repairs
/// near-miss parent references instead of synthesizing a new parent
/// (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverMode {
    Off,
    Exact,
    Fuzzy,
}

impl Default for ResolverMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Delta-contract normalizer/gate knobs (C5, C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// When true, an unknown path fails the batch instead of being dropped.
    pub normalizer_validate_paths: bool,
    pub resolvers_mode: ResolverMode,
    /// Per-path minimum instance count the quality gate requires.
    pub quality_min_instances: usize,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            normalizer_validate_paths: false,
            resolvers_mode: ResolverMode::Off,
            quality_min_instances: 1,
        }
    }
}

/// Staged-contract (C10) knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedConfig {
    /// Max retries per LLM call across all passes.
    pub pass_retries: usize,
    /// Max instances per path captured by the identifier-fill pass.
    pub nodes_fill_cap: usize,
}

impl Default for StagedConfig {
    fn default() -> Self {
        Self {
            pass_retries: 2,
            nodes_fill_cap: 100,
        }
    }
}

/// Gleaning loop knobs (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GleaningConfig {
    pub enabled: bool,
    pub max_passes: usize,
}

impl Default for GleaningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_passes: 2,
        }
    }
}

/// `JsonCompleter` enforcement knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleterConfig {
    /// Require the completer to schema-enforce JSON.
    pub structured_output: bool,
    /// Reject all-null JSON envelopes.
    pub structured_sparse_check: bool,
}

impl Default for CompleterConfig {
    fn default() -> Self {
        Self {
            structured_output: false,
            structured_sparse_check: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            contract: ExtractionContract::default(),
            batching: BatchingConfig::default(),
            delta: DeltaConfig::default(),
            staged: StagedConfig::default(),
            gleaning: GleaningConfig::default(),
            completer: CompleterConfig::default(),
        }
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl ExtractionConfig {
    /// Load config from `kgx.toml` in the project root, with env var
    /// overrides. Falls back to defaults if no config file exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join("kgx.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        env_override("KGX_CHUNK_MAX_TOKENS", &mut config.batching.chunk_max_tokens);
        env_override("KGX_MERGE_THRESHOLD", &mut config.batching.merge_threshold);
        env_override(
            "KGX_STAGED_PASS_RETRIES",
            &mut config.staged.pass_retries,
        );
        env_override(
            "KGX_STAGED_NODES_FILL_CAP",
            &mut config.staged.nodes_fill_cap,
        );
        env_override(
            "KGX_DELTA_QUALITY_MIN_INSTANCES",
            &mut config.delta.quality_min_instances,
        );
        env_override("KGX_GLEANING_MAX_PASSES", &mut config.gleaning.max_passes);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.batching.merge_threshold) {
            anyhow::bail!(
                "merge_threshold ({}) must be in [0.0, 1.0)",
                self.batching.merge_threshold
            );
        }
        if self.batching.chunk_max_tokens == 0 {
            anyhow::bail!("chunk_max_tokens must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = ExtractionConfig::default();
        assert_eq!(config.batching.chunk_max_tokens, 512);
        assert_eq!(config.batching.merge_threshold, 0.85);
        assert_eq!(config.staged.pass_retries, 2);
        assert_eq!(config.contract, ExtractionContract::Delta);
        assert_eq!(config.delta.resolvers_mode, ResolverMode::Off);
    }

    #[test]
    fn config_from_toml_overrides_defaults() {
        let toml_str = r#"
contract = "staged"

[batching]
chunk_max_tokens = 1024

[delta]
resolvers_mode = "fuzzy"
"#;
        let config: ExtractionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.contract, ExtractionContract::Staged);
        assert_eq!(config.batching.chunk_max_tokens, 1024);
        assert_eq!(config.delta.resolvers_mode, ResolverMode::Fuzzy);
        // Unspecified fields keep their defaults.
        assert_eq!(config.batching.merge_threshold, 0.85);
    }

    #[test]
    fn load_nonexistent_project_root_returns_defaults() {
        let config = ExtractionConfig::load(Path::new("/nonexistent/path")).unwrap();
        assert_eq!(config.batching.chunk_max_tokens, 512);
    }

    #[test]
    fn load_rejects_out_of_range_merge_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("kgx.toml"),
            "[batching]\nmerge_threshold = 1.5\n",
        )
        .unwrap();
        assert!(ExtractionConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn load_applies_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        // SAFETY: test runs single-threaded within this process for this var.
        unsafe {
            std::env::set_var("KGX_CHUNK_MAX_TOKENS", "2048");
        }
        let config = ExtractionConfig::load(tmp.path()).unwrap();
        unsafe {
            std::env::remove_var("KGX_CHUNK_MAX_TOKENS");
        }
        assert_eq!(config.batching.chunk_max_tokens, 2048);
    }
}
