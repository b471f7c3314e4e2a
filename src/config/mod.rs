//! Engine configuration
//!
//! All tunables of the aggregation engine live here: the reference timezone
//! offset and day-start hour for the bucket resolver, the grace period and
//! pending-run staleness threshold, diagnostics thresholds, per-metric
//! sanity ceilings and ratio-metric definitions. Loaded from a TOML file
//! with full defaults, so a missing config file is not an error.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::bucket::BucketResolver;
use crate::error::{EngineError, EngineResult};

/// A metric that must be recomputed from constituent counters instead of
/// naively summed. Recorded in basis points of numerator over denominator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioMetric {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reference timezone as a fixed UTC offset, e.g. "+00:00" or "-05:00".
    /// Changing this after data exists is a breaking migration.
    pub reference_offset: String,
    /// Hour (0-23) at which a day bucket begins
    pub day_start_hour: u32,
    /// Clock-skew allowance past a day's end boundary before it is
    /// eligible for aggregation
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Pending runs older than this are treated as abandoned and reclaimed
    #[serde(with = "humantime_serde")]
    pub pending_run_ttl: Duration,
    /// Days without a succeeded run older than this are flagged as backlog
    pub backlog_threshold_days: u32,
    /// How many runs the diagnostics snapshot includes
    pub recent_runs_limit: usize,
    /// Per-metric sanity ceilings; values above the ceiling are anomalies
    pub sanity_ceilings: HashMap<String, i64>,
    /// Ratio metrics excluded from naive summation
    pub ratio_metrics: Vec<RatioMetric>,
    /// Base directory for the file-backed store
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_offset: "+00:00".to_string(),
            day_start_hour: 0,
            grace_period: Duration::from_secs(300),
            pending_run_ttl: Duration::from_secs(1800),
            backlog_threshold_days: 2,
            recent_runs_limit: 20,
            sanity_ceilings: HashMap::new(),
            ratio_metrics: Vec::new(),
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::config(format!("failed to read {}: {e}", path.display()))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    EngineError::config(format!("failed to parse {}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.day_start_hour > 23 {
            return Err(EngineError::config(format!(
                "day_start_hour must be 0-23, got {}",
                self.day_start_hour
            )));
        }
        self.parse_offset()?;
        for ratio in &self.ratio_metrics {
            if ratio.numerator == ratio.name || ratio.denominator == ratio.name {
                return Err(EngineError::config(format!(
                    "ratio metric '{}' may not be its own constituent",
                    ratio.name
                )));
            }
        }
        Ok(())
    }

    fn parse_offset(&self) -> EngineResult<FixedOffset> {
        self.reference_offset.parse::<FixedOffset>().map_err(|e| {
            EngineError::config(format!(
                "invalid reference_offset '{}': {e}",
                self.reference_offset
            ))
        })
    }

    /// Build the bucket resolver all components of one deployment share
    pub fn resolver(&self) -> EngineResult<BucketResolver> {
        let offset = self.parse_offset()?;
        info!(
            offset = %self.reference_offset,
            day_start_hour = self.day_start_hour,
            "using reference timezone for day bucketing"
        );
        Ok(BucketResolver::new(
            offset,
            self.day_start_hour,
            self.grace_period,
        ))
    }

    /// Data directory for the file-backed store
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".daily-stats"))
                .unwrap_or_else(|| PathBuf::from(".daily-stats"))
        })
    }

    /// Whether `metric` is declared as a ratio and must not be summed
    pub fn is_ratio_metric(&self, metric: &str) -> bool {
        self.ratio_metrics.iter().any(|r| r.name == metric)
    }
}
