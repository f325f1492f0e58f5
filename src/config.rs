// ⚙️ Pipeline Configuration - One immutable config drives a whole run
//
// Defaults mirror the production quarterly setup: quarterly windows,
// 4-period lag, PageRank damping 0.85 with 20 iterations, 4-hop control
// traversal cap. Every run is fingerprinted with a SHA-256 hash of the
// canonical JSON serialization so outputs can be traced back to the exact
// parameter set that produced them.

use crate::error::{PipelineError, Result};
use crate::graph::{EntityType, RelationType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // ========================================================================
    // HORIZON & WINDOWS
    // ========================================================================
    /// First calendar year covered by the window sequence (inclusive).
    pub start_year: i32,

    /// Last calendar year covered by the window sequence (inclusive).
    pub end_year: i32,

    /// Length of each snapshot period in months (3 = quarterly).
    pub window_months: u32,

    // ========================================================================
    // PROJECTION
    // ========================================================================
    /// Entity types included in every projection.
    pub node_types: Vec<EntityType>,

    /// Relation types included in every projection.
    pub rel_types: Vec<RelationType>,

    /// Whether heuristically imputed relationships enter projections.
    /// Once projected, imputed edges are treated exactly like observed ones.
    pub include_imputed: bool,

    /// Read-concurrency hint passed through to the store query.
    pub read_concurrency: usize,

    // ========================================================================
    // ALGORITHMS
    // ========================================================================
    pub page_rank_damping: f64,
    pub page_rank_max_iterations: usize,
    pub page_rank_tolerance: f64,

    /// Modularity resolution for community detection.
    pub community_resolution: f64,

    /// Communities smaller than this collapse into the "other" bucket.
    pub community_min_size: usize,

    /// Seed for the community processing-order permutation. Identical seed +
    /// identical snapshot = identical partition.
    pub random_seed: u64,

    /// Hop cap for the indirect-control traversal. A heuristic truncation
    /// inherited from the source data pipeline; kept configurable on purpose.
    pub control_depth_cap: usize,

    // ========================================================================
    // LAGGING
    // ========================================================================
    /// Number of whole periods each network feature is shifted forward.
    /// Zero is allowed but logged as a warning: same-period features leak.
    pub lag_periods: usize,

    // ========================================================================
    // RESILIENCE
    // ========================================================================
    /// Retry budget per period for transient store failures.
    pub max_retries: u32,

    /// Base backoff in milliseconds; doubled on each attempt.
    pub retry_backoff_ms: u64,

    // ========================================================================
    // OUTPUT
    // ========================================================================
    pub output_dir: PathBuf,

    /// Also write one edge-list CSV per window next to the panel.
    pub export_edges: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            start_year: 2010,
            end_year: 2020,
            window_months: 3,
            node_types: EntityType::ALL.to_vec(),
            rel_types: RelationType::ALL.to_vec(),
            include_imputed: true,
            read_concurrency: 4,
            page_rank_damping: 0.85,
            page_rank_max_iterations: 20,
            page_rank_tolerance: 1e-7,
            community_resolution: 1.0,
            community_min_size: 5,
            random_seed: 42,
            control_depth_cap: 4,
            lag_periods: 4,
            max_retries: 3,
            retry_backoff_ms: 2000,
            output_dir: PathBuf::from("output"),
            export_edges: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file; absent keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_months == 0 {
            return Err(PipelineError::config("window_months must be positive"));
        }
        if self.end_year < self.start_year {
            return Err(PipelineError::config(format!(
                "end_year ({}) before start_year ({})",
                self.end_year, self.start_year
            )));
        }
        if !(self.page_rank_damping > 0.0 && self.page_rank_damping < 1.0) {
            return Err(PipelineError::config(format!(
                "page_rank_damping must be in (0, 1), got {}",
                self.page_rank_damping
            )));
        }
        if self.page_rank_max_iterations == 0 {
            return Err(PipelineError::config("page_rank_max_iterations must be positive"));
        }
        if self.community_resolution <= 0.0 {
            return Err(PipelineError::config("community_resolution must be positive"));
        }
        if self.node_types.is_empty() {
            return Err(PipelineError::config("node_types must not be empty"));
        }
        if self.rel_types.is_empty() {
            return Err(PipelineError::config("rel_types must not be empty"));
        }
        Ok(())
    }

    /// SHA-256 fingerprint of the canonical JSON serialization. Written into
    /// the run manifest so every output file is traceable to its parameters.
    pub fn params_hash(&self) -> String {
        let payload = serde_json::to_string(self).expect("config serialization is infallible");
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_months, 3);
        assert_eq!(config.lag_periods, 4);
        assert_eq!(config.control_depth_cap, 4);
    }

    #[test]
    fn test_params_hash_is_stable_and_sensitive() {
        let a = PipelineConfig::default();
        let b = PipelineConfig::default();
        assert_eq!(a.params_hash(), b.params_hash());

        let mut c = PipelineConfig::default();
        c.lag_periods = 8;
        assert_ne!(a.params_hash(), c.params_hash());
    }

    #[test]
    fn test_validate_rejects_bad_damping() {
        let mut config = PipelineConfig::default();
        config.page_rank_damping = 1.0;
        assert!(config.validate().is_err());
        config.page_rank_damping = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_horizon() {
        let mut config = PipelineConfig::default();
        config.start_year = 2020;
        config.end_year = 2010;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"lag_periods": 2, "community_min_size": 10}"#).unwrap();
        assert_eq!(config.lag_periods, 2);
        assert_eq!(config.community_min_size, 10);
        assert_eq!(config.page_rank_damping, 0.85);
        assert_eq!(config.rel_types.len(), 3);
    }
}
