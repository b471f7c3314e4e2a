//! In-memory counter store backend
//!
//! Backs tests and single-process embedding. Every mutation runs under one
//! write lock, which gives the atomic-increment and insert-if-absent claim
//! guarantees the `CounterStore` contract requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::types::{
    AggregationRun, ClaimOutcome, CounterSnapshot, DailyAggregate, LiveCounter, ResetAudit,
    ResetScope, RunStatus,
};
use super::{apply_claim, apply_promote, CounterStore};
use crate::bucket::DayBucket;

#[derive(Default)]
struct Inner {
    counters: HashMap<DayBucket, HashMap<String, LiveCounter>>,
    runs: HashMap<DayBucket, Vec<AggregationRun>>,
    aggregates: HashMap<DayBucket, Vec<DailyAggregate>>,
    audits: Vec<ResetAudit>,
}

impl Inner {
    fn day_is_final(&self, day: DayBucket) -> bool {
        self.runs
            .get(&day)
            .map(|runs| runs.iter().any(|r| r.status == RunStatus::Succeeded))
            .unwrap_or(false)
    }
}

/// In-memory implementation of the counter store
#[derive(Default)]
pub struct MemoryCounterStore {
    inner: RwLock<Inner>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        metric: &str,
        day: DayBucket,
        delta: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;

        if inner.day_is_final(day) {
            return Err(StoreError::stale_write(metric, day));
        }

        let counters = inner.counters.entry(day).or_default();
        if let Some(counter) = counters.get(metric) {
            if counter.archived {
                return Err(StoreError::stale_write(metric, day));
            }
        }

        let counter = counters.entry(metric.to_string()).or_insert(LiveCounter {
            metric: metric.to_string(),
            day,
            value: 0,
            increments: 0,
            last_updated: now,
            archived: false,
        });
        counter.value += delta;
        counter.increments += 1;
        counter.last_updated = now;
        Ok(counter.value)
    }

    async fn live_counters(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>> {
        let inner = self.inner.read().await;
        let mut counters: Vec<_> = inner
            .counters
            .get(&day)
            .map(|m| m.values().filter(|c| !c.archived).cloned().collect())
            .unwrap_or_default();
        counters.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(counters)
    }

    async fn all_live_counters(&self) -> StoreResult<Vec<LiveCounter>> {
        let inner = self.inner.read().await;
        let mut counters: Vec<_> = inner
            .counters
            .values()
            .flat_map(|m| m.values())
            .filter(|c| !c.archived)
            .cloned()
            .collect();
        counters.sort_by(|a, b| (a.day, &a.metric).cmp(&(b.day, &b.metric)));
        Ok(counters)
    }

    async fn counters_for_day(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>> {
        let inner = self.inner.read().await;
        let mut counters: Vec<_> = inner
            .counters
            .get(&day)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        counters.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(counters)
    }

    async fn archive_counters(&self, day: DayBucket) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let mut archived = 0;
        if let Some(counters) = inner.counters.get_mut(&day) {
            for counter in counters.values_mut().filter(|c| !c.archived) {
                counter.archived = true;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn zero_counters(
        &self,
        scope: &ResetScope,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<CounterSnapshot>> {
        let mut inner = self.inner.write().await;
        let mut snapshots = Vec::new();
        for counters in inner.counters.values_mut() {
            for counter in counters.values_mut() {
                if counter.archived || !scope.matches(&counter.metric, counter.day) {
                    continue;
                }
                snapshots.push(CounterSnapshot {
                    metric: counter.metric.clone(),
                    day: counter.day,
                    previous_value: counter.value,
                    previous_increments: counter.increments,
                });
                counter.value = 0;
                counter.increments = 0;
                counter.last_updated = now;
            }
        }
        snapshots.sort_by(|a, b| (a.day, &a.metric).cmp(&(b.day, &b.metric)));
        Ok(snapshots)
    }

    async fn claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut inner = self.inner.write().await;
        let runs = inner.runs.entry(run.day).or_default();
        Ok(apply_claim(runs, run, pending_ttl, now, false))
    }

    async fn force_claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut inner = self.inner.write().await;
        let runs = inner.runs.entry(run.day).or_default();
        Ok(apply_claim(runs, run, pending_ttl, now, true))
    }

    async fn complete_run(&self, run: AggregationRun) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let day = run.day;
        let run_id = run.id.clone();
        let status = run.status.clone();

        let runs = inner
            .runs
            .get_mut(&day)
            .ok_or_else(|| StoreError::not_found(format!("runs for {day}")))?;
        let slot = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::not_found(format!("run {run_id}")))?;
        *slot = run;

        // Promotion shares the run transition's critical section; a failed
        // run leaves its staged generation non-current.
        if status == RunStatus::Succeeded {
            if let Some(aggregates) = inner.aggregates.get_mut(&day) {
                apply_promote(aggregates, &run_id);
            }
        }
        Ok(())
    }

    async fn run_for_day(&self, day: DayBucket) -> StoreResult<Option<AggregationRun>> {
        let inner = self.inner.read().await;
        Ok(inner.runs.get(&day).and_then(|runs| {
            runs.iter()
                .filter(|r| r.status != RunStatus::SkippedAlreadyDone)
                .next_back()
                .cloned()
        }))
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<_> = inner.runs.values().flatten().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn insert_aggregates(
        &self,
        day: DayBucket,
        aggregates: Vec<DailyAggregate>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.aggregates.entry(day).or_default().extend(aggregates);
        Ok(())
    }

    async fn aggregates_for_day(&self, day: DayBucket) -> StoreResult<Vec<DailyAggregate>> {
        let inner = self.inner.read().await;
        Ok(inner.aggregates.get(&day).cloned().unwrap_or_default())
    }

    async fn append_reset_audit(&self, audit: ResetAudit) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.audits.push(audit);
        Ok(())
    }

    async fn reset_audits(&self) -> StoreResult<Vec<ResetAudit>> {
        let inner = self.inner.read().await;
        let mut audits = inner.audits.clone();
        audits.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(audits)
    }
}
