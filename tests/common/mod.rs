//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use daily_stats::aggregator::Aggregator;
use daily_stats::bucket::DayBucket;
use daily_stats::clock::FixedClock;
use daily_stats::config::EngineConfig;
use daily_stats::diagnostics::DiagnosticsReporter;
use daily_stats::reset::ResetCoordinator;
use daily_stats::store::{CounterStore, MemoryCounterStore};

/// Fully wired engine over an in-memory store with a pinned clock
pub struct TestEngine {
    pub store: Arc<MemoryCounterStore>,
    pub aggregator: Aggregator,
    pub diagnostics: DiagnosticsReporter,
    pub reset: ResetCoordinator,
    pub now: DateTime<Utc>,
}

/// Engine with default configuration, pinned to `now`
pub fn engine_at(now: DateTime<Utc>) -> TestEngine {
    engine_with(EngineConfig::default(), now)
}

/// Engine with custom configuration, pinned to `now`
pub fn engine_with(config: EngineConfig, now: DateTime<Utc>) -> TestEngine {
    let store = Arc::new(MemoryCounterStore::new());
    let dyn_store: Arc<dyn CounterStore> = store.clone();
    let clock = Arc::new(FixedClock(now));
    let resolver = config.resolver().expect("valid config");

    TestEngine {
        store,
        aggregator: Aggregator::new(
            dyn_store.clone(),
            resolver.clone(),
            clock.clone(),
            config.clone(),
        ),
        diagnostics: DiagnosticsReporter::new(
            dyn_store.clone(),
            resolver,
            clock.clone(),
            config,
        ),
        reset: ResetCoordinator::new(dyn_store, clock),
        now,
    }
}

/// Midday on 2024-03-02 UTC: day bucket 2024-03-01 is safely complete
pub fn midday_march_2() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn day(s: &str) -> DayBucket {
    s.parse().expect("valid day bucket")
}
