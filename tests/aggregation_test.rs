//! Aggregator behavior: idempotency across repeated and concurrent
//! triggers, too-early refusal, zero-event days and re-aggregation

mod common;

use common::{day, engine_at, engine_with, midday_march_2};
use daily_stats::aggregator::AggregationOutcome;
use daily_stats::config::{EngineConfig, RatioMetric};
use daily_stats::store::{AggregateKind, CounterStore, RunStatus};

#[tokio::test]
async fn increments_sum_into_one_daily_aggregate() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    for delta in [3, 5, 2] {
        engine
            .store
            .increment("requests", target, delta, engine.now)
            .await
            .expect("increment");
    }

    let outcome = engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("aggregate");
    let AggregationOutcome::Succeeded { run, aggregates } = outcome else {
        panic!("expected success");
    };
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].metric, "requests");
    assert_eq!(aggregates[0].total, 10);
    assert_eq!(aggregates[0].increments, Some(3));
    assert!(aggregates[0].current);
}

#[tokio::test]
async fn second_invocation_reports_already_aggregated() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    engine
        .store
        .increment("requests", target, 10, engine.now)
        .await
        .expect("increment");

    let first = engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("first aggregate");
    assert_eq!(first.status_label(), "succeeded");

    let second = engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("second aggregate");
    assert!(matches!(
        second,
        AggregationOutcome::AlreadyAggregated { .. }
    ));

    // Total unchanged; still exactly one current aggregate
    let aggregates = engine
        .store
        .aggregates_for_day(target)
        .await
        .expect("aggregates");
    let current: Vec<_> = aggregates.iter().filter(|a| a.current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].total, 10);
}

#[tokio::test]
async fn racing_invocations_converge_to_one_success() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    engine
        .store
        .increment("requests", target, 7, engine.now)
        .await
        .expect("increment");

    let (a, b) = tokio::join!(
        engine.aggregator.aggregate(Some(target)),
        engine.aggregator.aggregate(Some(target)),
    );
    let a = a.expect("first call");
    let b = b.expect("second call");

    let successes = [&a, &b]
        .iter()
        .filter(|o| matches!(o, AggregationOutcome::Succeeded { .. }))
        .count();
    assert_eq!(successes, 1, "exactly one invocation may succeed");
    for outcome in [&a, &b] {
        assert!(matches!(
            outcome,
            AggregationOutcome::Succeeded { .. }
                | AggregationOutcome::InProgress { .. }
                | AggregationOutcome::AlreadyAggregated { .. }
        ));
    }

    let succeeded_runs = engine
        .store
        .recent_runs(10)
        .await
        .expect("runs")
        .into_iter()
        .filter(|r| r.status == RunStatus::Succeeded)
        .count();
    assert_eq!(succeeded_runs, 1);

    let current = engine
        .store
        .aggregates_for_day(target)
        .await
        .expect("aggregates")
        .into_iter()
        .filter(|a| a.current)
        .count();
    assert_eq!(current, 1);
}

#[tokio::test]
async fn incomplete_day_is_refused_without_writes() {
    let engine = engine_at(midday_march_2());
    let today = day("2024-03-02");

    engine
        .store
        .increment("requests", today, 4, engine.now)
        .await
        .expect("increment");

    let outcome = engine
        .aggregator
        .aggregate(Some(today))
        .await
        .expect("aggregate");
    assert!(matches!(outcome, AggregationOutcome::TooEarly { .. }));

    assert!(engine.store.run_for_day(today).await.expect("run").is_none());
    assert!(engine
        .store
        .aggregates_for_day(today)
        .await
        .expect("aggregates")
        .is_empty());
    let counters = engine.store.live_counters(today).await.expect("counters");
    assert_eq!(counters[0].value, 4);
}

#[tokio::test]
async fn grace_period_delays_eligibility() {
    // 00:02 on Mar 2: the day boundary has passed but the default 5-minute
    // grace period has not
    let just_after_midnight =
        midday_march_2() - chrono::Duration::hours(11) - chrono::Duration::minutes(58);
    let engine = engine_at(just_after_midnight);

    let outcome = engine
        .aggregator
        .aggregate(Some(day("2024-03-01")))
        .await
        .expect("aggregate");
    assert!(matches!(outcome, AggregationOutcome::TooEarly { .. }));
}

#[tokio::test]
async fn omitted_target_defaults_to_yesterday() {
    let engine = engine_at(midday_march_2());

    engine
        .store
        .increment("requests", day("2024-03-01"), 6, engine.now)
        .await
        .expect("increment");

    let outcome = engine.aggregator.aggregate(None).await.expect("aggregate");
    let AggregationOutcome::Succeeded { run, aggregates } = outcome else {
        panic!("expected success");
    };
    assert_eq!(run.day, day("2024-03-01"));
    assert_eq!(aggregates[0].total, 6);
}

#[tokio::test]
async fn zero_event_day_succeeds_with_no_aggregates() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    let outcome = engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("aggregate");
    let AggregationOutcome::Succeeded { run, aggregates } = outcome else {
        panic!("expected success");
    };
    assert!(aggregates.is_empty());
    assert_eq!(run.metrics_aggregated, 0);

    // Distinguishable from a day that never ran
    let recorded = engine
        .store
        .run_for_day(target)
        .await
        .expect("run")
        .expect("run recorded");
    assert_eq!(recorded.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn aggregated_day_rejects_late_increments() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    engine
        .store
        .increment("requests", target, 1, engine.now)
        .await
        .expect("increment");
    engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("aggregate");

    let err = engine
        .store
        .increment("requests", target, 1, engine.now)
        .await
        .expect_err("late data must be rejected");
    assert!(err.is_stale_write());
}

#[tokio::test]
async fn ratio_metric_is_derived_not_summed() {
    let config = EngineConfig {
        ratio_metrics: vec![RatioMetric {
            name: "cache_hit_rate".to_string(),
            numerator: "cache_hits".to_string(),
            denominator: "cache_lookups".to_string(),
        }],
        ..Default::default()
    };
    let engine = engine_with(config, midday_march_2());
    let target = day("2024-03-01");

    engine
        .store
        .increment("cache_hits", target, 30, engine.now)
        .await
        .expect("increment");
    engine
        .store
        .increment("cache_lookups", target, 40, engine.now)
        .await
        .expect("increment");

    let outcome = engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("aggregate");
    let AggregationOutcome::Succeeded { aggregates, .. } = outcome else {
        panic!("expected success");
    };

    let ratio = aggregates
        .iter()
        .find(|a| a.metric == "cache_hit_rate")
        .expect("derived ratio aggregate");
    assert_eq!(ratio.kind, AggregateKind::RatioBasisPoints);
    assert_eq!(ratio.total, 7_500); // 30/40 in basis points

    let hits = aggregates
        .iter()
        .find(|a| a.metric == "cache_hits")
        .expect("constituent sum");
    assert_eq!(hits.total, 30);
}

#[tokio::test]
async fn reaggregation_supersedes_without_editing_history() {
    let engine = engine_at(midday_march_2());
    let target = day("2024-03-01");

    engine
        .store
        .increment("requests", target, 10, engine.now)
        .await
        .expect("increment");
    engine
        .aggregator
        .aggregate(Some(target))
        .await
        .expect("aggregate");

    let outcome = engine
        .aggregator
        .reaggregate(target)
        .await
        .expect("reaggregate");
    let AggregationOutcome::Succeeded { run: second_run, .. } = outcome else {
        panic!("expected success");
    };

    let aggregates = engine
        .store
        .aggregates_for_day(target)
        .await
        .expect("aggregates");
    assert_eq!(aggregates.len(), 2, "history preserved");
    let current: Vec<_> = aggregates.iter().filter(|a| a.current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].run_id, second_run.id);
    assert_eq!(current[0].total, 10);
}
