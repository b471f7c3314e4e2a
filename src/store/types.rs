//! Record definitions for the counter store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bucket::DayBucket;

/// Aggregation run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl RunId {
    pub fn new() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Forced reset identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResetId(pub String);

impl Default for ResetId {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetId {
    pub fn new() -> Self {
        Self(format!("reset-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for ResetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable per-day counter, created implicitly on first increment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveCounter {
    pub metric: String,
    pub day: DayBucket,
    pub value: i64,
    /// Number of increments applied since creation or last reset
    pub increments: u64,
    pub last_updated: DateTime<Utc>,
    /// Set once the counter has been consumed by a succeeded aggregation;
    /// archived counters reject further increments
    pub archived: bool,
}

/// Immutable rollup of one metric for one completed day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub metric: String,
    pub day: DayBucket,
    pub total: i64,
    /// Contributing increment count, where tracked (pass-through sums only)
    pub increments: Option<u64>,
    pub kind: AggregateKind,
    pub aggregated_at: DateTime<Utc>,
    pub run_id: RunId,
    /// At most one aggregate per (metric, day) is current. A generation is
    /// written staged (false) and promoted when its run succeeds; a
    /// superseding re-aggregation demotes it instead of editing history
    pub current: bool,
}

/// How an aggregate value was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    /// Pass-through total of the live counter
    Sum,
    /// Ratio recomputed from constituent counters, in basis points
    RatioBasisPoints,
}

/// Aggregation run status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
    SkippedAlreadyDone,
}

/// Record of one aggregator invocation; doubles as the claim slot that
/// serializes duplicate scheduler triggers for the same day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRun {
    pub id: RunId,
    pub day: DayBucket,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metrics_aggregated: u32,
}

impl AggregationRun {
    /// A fresh pending run for `day`
    pub fn pending(day: DayBucket, started_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            day,
            status: RunStatus::Pending,
            started_at,
            finished_at: None,
            error: None,
            metrics_aggregated: 0,
        }
    }

    pub fn succeed(mut self, finished_at: DateTime<Utc>, metrics_aggregated: u32) -> Self {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(finished_at);
        self.metrics_aggregated = metrics_aggregated;
        self
    }

    pub fn fail(mut self, finished_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.finished_at = Some(finished_at);
        self.error = Some(error.into());
        self
    }
}

/// Outcome of the atomic claim for a day's aggregation run
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller won the claim and must perform the aggregation
    Claimed,
    /// A succeeded run already exists for the day
    AlreadySucceeded(AggregationRun),
    /// A fresh pending run holds the claim
    InProgress(AggregationRun),
}

/// Pre-reset value of one counter, captured for forensic replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub metric: String,
    pub day: DayBucket,
    pub previous_value: i64,
    pub previous_increments: u64,
}

/// Restriction on which live counters a forced reset touches; empty
/// lists mean no restriction on that axis
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ResetScope {
    pub metrics: Vec<String>,
    pub days: Vec<DayBucket>,
}

impl ResetScope {
    /// Scope covering every live counter
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, metric: &str, day: DayBucket) -> bool {
        (self.metrics.is_empty() || self.metrics.iter().any(|m| m == metric))
            && (self.days.is_empty() || self.days.contains(&day))
    }
}

/// Append-only record of one forced reset invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAudit {
    pub id: ResetId,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub scope: ResetScope,
    pub counters: Vec<CounterSnapshot>,
}
