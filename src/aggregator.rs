//! Daily aggregation of live counters into immutable rollups
//!
//! The aggregator claims the target day before writing anything, so two
//! scheduler invocations racing on the same day serialize into exactly one
//! winner. Re-running for an already-aggregated day is a cheap no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bucket::{BucketResolver, DayBucket};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{
    AggregateKind, AggregationRun, ClaimOutcome, CounterStore, DailyAggregate, LiveCounter, RunId,
    StoreResult,
};

/// Result of one aggregator invocation. Only `Succeeded` performed writes;
/// the other variants report why nothing ran.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregationOutcome {
    /// This invocation won the claim and wrote the day's aggregates
    Succeeded {
        run: AggregationRun,
        aggregates: Vec<DailyAggregate>,
    },
    /// The target day is not yet complete; retry after `eligible_at`
    TooEarly {
        day: DayBucket,
        eligible_at: DateTime<Utc>,
    },
    /// A succeeded run already exists for the day
    AlreadyAggregated { day: DayBucket, run_id: RunId },
    /// A concurrent invocation holds the claim; do not retry immediately
    InProgress { day: DayBucket, run_id: RunId },
}

impl AggregationOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::TooEarly { .. } => "too early",
            Self::AlreadyAggregated { .. } => "already aggregated",
            Self::InProgress { .. } => "in progress",
        }
    }
}

/// Rolls completed days up into daily aggregates
pub struct Aggregator {
    store: Arc<dyn CounterStore>,
    resolver: BucketResolver,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Aggregator {
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

    /// Aggregate `target` (yesterday when omitted). Idempotent across
    /// repeated and concurrent invocations for the same day.
    pub async fn aggregate(&self, target: Option<DayBucket>) -> EngineResult<AggregationOutcome> {
        let now = self.clock.now();
        let day = target.unwrap_or_else(|| self.resolver.yesterday(now));

        if !self.resolver.is_complete(day, now) {
            let eligible_at = self.resolver.complete_at(day);
            debug!(%day, %eligible_at, "target day not yet complete");
            return Ok(AggregationOutcome::TooEarly { day, eligible_at });
        }

        let run = AggregationRun::pending(day, now);
        match self
            .store
            .claim_run(run.clone(), self.config.pending_run_ttl, now)
            .await?
        {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadySucceeded(existing) => {
                debug!(%day, run = %existing.id, "day already aggregated");
                return Ok(AggregationOutcome::AlreadyAggregated {
                    day,
                    run_id: existing.id,
                });
            }
            ClaimOutcome::InProgress(existing) => {
                warn!(%day, run = %existing.id, "concurrent aggregation in progress");
                return Ok(AggregationOutcome::InProgress {
                    day,
                    run_id: existing.id,
                });
            }
        }

        self.finish_claimed_run(run, day, false).await
    }

    /// Explicitly recompute an already-aggregated day from its archived
    /// counters, writing a superseding generation of aggregates under a
    /// fresh run record. The administrative answer to late data.
    pub async fn reaggregate(&self, day: DayBucket) -> EngineResult<AggregationOutcome> {
        let now = self.clock.now();

        if !self.resolver.is_complete(day, now) {
            let eligible_at = self.resolver.complete_at(day);
            return Ok(AggregationOutcome::TooEarly { day, eligible_at });
        }

        let run = AggregationRun::pending(day, now);
        match self
            .store
            .force_claim_run(run.clone(), self.config.pending_run_ttl, now)
            .await?
        {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadySucceeded(existing) => {
                return Ok(AggregationOutcome::AlreadyAggregated {
                    day,
                    run_id: existing.id,
                });
            }
            ClaimOutcome::InProgress(existing) => {
                warn!(%day, run = %existing.id, "aggregation in progress; not superseding");
                return Ok(AggregationOutcome::InProgress {
                    day,
                    run_id: existing.id,
                });
            }
        }

        info!(%day, run = %run.id, "re-aggregating from archived counters");
        self.finish_claimed_run(run, day, true).await
    }

    /// Steps 4-6 of a claimed run: sum, write, archive, mark terminal
    /// status. On failure the run is marked failed and counters are left
    /// untouched, so a later invocation can reclaim the day.
    async fn finish_claimed_run(
        &self,
        run: AggregationRun,
        day: DayBucket,
        from_archived: bool,
    ) -> EngineResult<AggregationOutcome> {
        match self.write_aggregates(&run, day, from_archived).await {
            Ok(mut aggregates) => {
                let run = run.succeed(self.clock.now(), aggregates.len() as u32);
                // This also promotes the staged generation to current.
                self.store.complete_run(run.clone()).await?;
                for aggregate in &mut aggregates {
                    aggregate.current = true;
                }
                info!(
                    %day,
                    run = %run.id,
                    metrics = aggregates.len(),
                    "daily aggregation succeeded"
                );
                Ok(AggregationOutcome::Succeeded { run, aggregates })
            }
            Err(e) => {
                let message = e.to_string();
                let failed = run.clone().fail(self.clock.now(), &message);
                if let Err(complete_err) = self.store.complete_run(failed).await {
                    warn!(
                        %day,
                        run = %run.id,
                        error = %complete_err,
                        "failed to record failed run"
                    );
                }
                Err(EngineError::AggregationFailed {
                    day,
                    run_id: run.id,
                    message,
                })
            }
        }
    }

    async fn write_aggregates(
        &self,
        run: &AggregationRun,
        day: DayBucket,
        from_archived: bool,
    ) -> StoreResult<Vec<DailyAggregate>> {
        let counters = if from_archived {
            self.store.counters_for_day(day).await?
        } else {
            self.store.live_counters(day).await?
        };

        let aggregates = self.build_aggregates(&counters, day, &run.id);
        if aggregates.is_empty() {
            debug!(%day, "no counters recorded; day aggregates to nothing");
            return Ok(aggregates);
        }

        self.store.insert_aggregates(day, aggregates.clone()).await?;
        self.store.archive_counters(day).await?;

        if !from_archived {
            // An increment can land between the counter read and the
            // archive; the archived value keeps it, the aggregate does not,
            // and `reaggregate` is the recovery path.
            for archived in self.store.counters_for_day(day).await? {
                let read = counters
                    .iter()
                    .find(|c| c.metric == archived.metric)
                    .map(|c| c.value);
                if read != Some(archived.value) {
                    warn!(
                        metric = %archived.metric,
                        %day,
                        aggregated = read.unwrap_or(0),
                        archived = archived.value,
                        "counter changed during aggregation; aggregate omits the difference"
                    );
                }
            }
        }
        Ok(aggregates)
    }

    /// One staged (non-current) aggregate per metric: pass-through sums for
    /// plain counters, basis-point recomputation for configured ratio
    /// metrics. A live counter that shadows a declared ratio name is never
    /// summed. The generation becomes current when the run succeeds.
    fn build_aggregates(
        &self,
        counters: &[LiveCounter],
        day: DayBucket,
        run_id: &RunId,
    ) -> Vec<DailyAggregate> {
        let now = self.clock.now();
        let mut totals: HashMap<&str, i64> = HashMap::new();
        let mut aggregates = Vec::new();

        for counter in counters {
            if self.config.is_ratio_metric(&counter.metric) {
                warn!(
                    metric = %counter.metric,
                    %day,
                    value = counter.value,
                    "live counter shadows a ratio metric; excluded from summation"
                );
                continue;
            }
            totals.insert(counter.metric.as_str(), counter.value);
            aggregates.push(DailyAggregate {
                metric: counter.metric.clone(),
                day,
                total: counter.value,
                increments: Some(counter.increments),
                kind: AggregateKind::Sum,
                aggregated_at: now,
                run_id: run_id.clone(),
                current: false,
            });
        }

        for ratio in &self.config.ratio_metrics {
            let numerator = totals.get(ratio.numerator.as_str()).copied();
            let denominator = totals.get(ratio.denominator.as_str()).copied();
            if numerator.is_none() && denominator.is_none() {
                continue;
            }
            let num = numerator.unwrap_or(0);
            let den = denominator.unwrap_or(0);
            let total = if den > 0 {
                num.saturating_mul(10_000) / den
            } else {
                0
            };
            aggregates.push(DailyAggregate {
                metric: ratio.name.clone(),
                day,
                total,
                increments: None,
                kind: AggregateKind::RatioBasisPoints,
                aggregated_at: now,
                run_id: run_id.clone(),
                current: false,
            });
        }

        aggregates
    }
}
