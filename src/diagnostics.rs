//! Read-only diagnostic view of counter and run state
//!
//! Safe to call at arbitrary frequency: nothing here mutates the store or
//! interferes with a concurrent aggregation claim.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{BucketResolver, DayBucket};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::store::{AggregationRun, CounterStore, ResetAudit, RunStatus};

/// One live counter with its observed age
#[derive(Debug, Clone, Serialize)]
pub struct CounterView {
    pub metric: String,
    pub day: DayBucket,
    pub value: i64,
    pub increments: u64,
    pub age_seconds: i64,
}

/// Why a counter value looks wrong
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AnomalyReason {
    /// Counters only ever accumulate; a negative value means drift
    Negative,
    /// Value exceeds the per-metric sanity ceiling from configuration
    ExceedsCeiling { ceiling: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterAnomaly {
    pub metric: String,
    pub day: DayBucket,
    pub value: i64,
    #[serde(flatten)]
    pub anomaly: AnomalyReason,
}

/// Point-in-time view of the engine's state
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub generated_at: DateTime<Utc>,
    pub live_counters: Vec<CounterView>,
    pub recent_runs: Vec<AggregationRun>,
    /// Day buckets past the backlog threshold without a succeeded run
    pub backlog: Vec<DayBucket>,
    pub anomalies: Vec<CounterAnomaly>,
    pub reset_audits: Vec<ResetAudit>,
}

/// Produces diagnostic snapshots of counter state
pub struct DiagnosticsReporter {
    store: Arc<dyn CounterStore>,
    resolver: BucketResolver,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl DiagnosticsReporter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        resolver: BucketResolver,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            clock,
            config,
        }
    }

    pub async fn diagnose(&self) -> EngineResult<DiagnosticSnapshot> {
        let now = self.clock.now();
        let counters = self.store.all_live_counters().await?;

        let live_counters: Vec<CounterView> = counters
            .iter()
            .map(|c| CounterView {
                metric: c.metric.clone(),
                day: c.day,
                value: c.value,
                increments: c.increments,
                age_seconds: (now - c.last_updated).num_seconds(),
            })
            .collect();

        let mut anomalies = Vec::new();
        for counter in &counters {
            if counter.value < 0 {
                anomalies.push(CounterAnomaly {
                    metric: counter.metric.clone(),
                    day: counter.day,
                    value: counter.value,
                    anomaly: AnomalyReason::Negative,
                });
            } else if let Some(&ceiling) = self.config.sanity_ceilings.get(&counter.metric) {
                if counter.value > ceiling {
                    anomalies.push(CounterAnomaly {
                        metric: counter.metric.clone(),
                        day: counter.day,
                        value: counter.value,
                        anomaly: AnomalyReason::ExceedsCeiling { ceiling },
                    });
                }
            }
        }

        let backlog = self.find_backlog(&counters, now).await?;
        let recent_runs = self.store.recent_runs(self.config.recent_runs_limit).await?;
        let reset_audits = self.store.reset_audits().await?;

        debug!(
            counters = live_counters.len(),
            backlog = backlog.len(),
            anomalies = anomalies.len(),
            "diagnostic snapshot generated"
        );

        Ok(DiagnosticSnapshot {
            generated_at: now,
            live_counters,
            recent_runs,
            backlog,
            anomalies,
            reset_audits,
        })
    }

    /// Days with live counters that should have been aggregated by now but
    /// have no succeeded run
    async fn find_backlog(
        &self,
        counters: &[crate::store::LiveCounter],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<DayBucket>> {
        let today = self.resolver.today(now);
        let mut threshold = today;
        for _ in 0..self.config.backlog_threshold_days {
            threshold = threshold.prev();
        }

        let mut candidates: Vec<DayBucket> = counters
            .iter()
            .map(|c| c.day)
            .filter(|day| *day < threshold)
            .collect();
        candidates.sort();
        candidates.dedup();

        let mut backlog = Vec::new();
        for day in candidates {
            let succeeded = self
                .store
                .run_for_day(day)
                .await?
                .map(|run| run.status == RunStatus::Succeeded)
                .unwrap_or(false);
            if !succeeded {
                backlog.push(day);
            }
        }
        Ok(backlog)
    }
}
