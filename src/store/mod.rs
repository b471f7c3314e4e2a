//! Counter store abstraction
//!
//! All coordination state of the engine lives here: live counters, daily
//! aggregates, aggregation runs (which double as the claim slots that
//! serialize duplicate scheduler triggers) and the forced-reset audit log.
//! The engine itself keeps no in-process state between calls.

pub mod error;
pub mod file;
mod lock;
pub mod memory;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use file::FileCounterStore;
pub use memory::MemoryCounterStore;
pub use types::{
    AggregateKind, AggregationRun, ClaimOutcome, CounterSnapshot, DailyAggregate, LiveCounter,
    ResetAudit, ResetId, ResetScope, RunId, RunStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::bucket::DayBucket;

/// Abstract record store the engine is specified against.
///
/// Implementations must apply `increment` as an atomic read-modify-write and
/// `claim_run` as an atomic insert-if-absent; callers never read-then-write
/// from their side.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `delta` to the counter for (metric, day), creating it
    /// on first use. Rejects the write as stale once the day has been
    /// archived by a succeeded aggregation.
    async fn increment(
        &self,
        metric: &str,
        day: DayBucket,
        delta: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Live (non-archived) counters for one day
    async fn live_counters(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>>;

    /// All live counters across all days
    async fn all_live_counters(&self) -> StoreResult<Vec<LiveCounter>>;

    /// Every counter recorded for one day, archived included
    async fn counters_for_day(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>>;

    /// Flag the day's counters as consumed; returns how many were archived
    async fn archive_counters(&self, day: DayBucket) -> StoreResult<usize>;

    /// Zero every live counter matching `scope`, returning the captured
    /// pre-reset values. Archived counters are never touched.
    async fn zero_counters(
        &self,
        scope: &ResetScope,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<CounterSnapshot>>;

    /// Atomically claim the right to aggregate `run.day`. A pending run
    /// older than `pending_ttl` is treated as abandoned and reclaimed; a
    /// duplicate trigger against a succeeded day records a skipped run.
    async fn claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome>;

    /// Claim for an explicit re-aggregation: a succeeded run does not block
    /// the claim, but a fresh pending run still does.
    async fn force_claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome>;

    /// Persist the terminal state of a previously claimed run. Recording a
    /// succeeded run also promotes the run's staged aggregate generation to
    /// current, in the same critical section.
    async fn complete_run(&self, run: AggregationRun) -> StoreResult<()>;

    /// Latest non-skipped run for a day, if any
    async fn run_for_day(&self, day: DayBucket) -> StoreResult<Option<AggregationRun>>;

    /// Most recent runs across all days, newest first
    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>>;

    /// Append one staged (non-current) generation of aggregates for a day.
    /// Existing aggregates are immutable; promotion to current happens with
    /// the owning run's succeeded transition via `complete_run`.
    async fn insert_aggregates(
        &self,
        day: DayBucket,
        aggregates: Vec<DailyAggregate>,
    ) -> StoreResult<()>;

    /// All aggregate generations for a day
    async fn aggregates_for_day(&self, day: DayBucket) -> StoreResult<Vec<DailyAggregate>>;

    /// Append an entry to the forced-reset audit log
    async fn append_reset_audit(&self, audit: ResetAudit) -> StoreResult<()>;

    /// Full audit log, newest first
    async fn reset_audits(&self) -> StoreResult<Vec<ResetAudit>>;
}

/// Claim-slot state machine shared by the store backends. Must run inside
/// the backend's critical section so the reclaim decision is as atomic as
/// the original insert-if-absent.
pub(crate) fn apply_claim(
    runs: &mut Vec<AggregationRun>,
    run: AggregationRun,
    pending_ttl: Duration,
    now: DateTime<Utc>,
    force: bool,
) -> ClaimOutcome {
    if !force {
        if let Some(done) = runs
            .iter()
            .find(|r| r.status == RunStatus::Succeeded)
            .cloned()
        {
            // Duplicate trigger; record it so diagnostics can show the
            // scheduler double-fired.
            let mut skipped = run;
            skipped.status = RunStatus::SkippedAlreadyDone;
            skipped.finished_at = Some(now);
            runs.push(skipped);
            return ClaimOutcome::AlreadySucceeded(done);
        }
    }

    if let Some(pending) = runs
        .iter_mut()
        .find(|r| r.status == RunStatus::Pending)
    {
        let stale_after = chrono::Duration::from_std(pending_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if now - pending.started_at <= stale_after {
            return ClaimOutcome::InProgress(pending.clone());
        }
        // Abandoned by a crashed or killed invocation; reclaim.
        pending.status = RunStatus::Failed;
        pending.finished_at = Some(now);
        pending.error = Some("abandoned: pending past staleness threshold".to_string());
    }

    runs.push(run);
    ClaimOutcome::Claimed
}

/// Promote the generation written by `run_id` to current, demoting every
/// other generation. Runs inside the backend's critical section together
/// with the succeeded-run transition, so a failed run never leaves a
/// current generation behind.
pub(crate) fn apply_promote(aggregates: &mut [DailyAggregate], run_id: &RunId) {
    for aggregate in aggregates.iter_mut() {
        aggregate.current = aggregate.run_id == *run_id;
    }
}
