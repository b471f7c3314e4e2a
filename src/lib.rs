//! # daily-stats
//!
//! Daily statistics aggregation engine: rolls live, frequently-incremented
//! usage counters into immutable historical daily records, with a
//! diagnostic view of counter state and an operator-triggered forced reset
//! for drift recovery.
//!
//! Event ingestion increments live counters through the [`store`]
//! abstraction; a cron-like scheduler invokes [`aggregator::Aggregator`]
//! once per day (tolerating zero, one or many invocations for the same
//! day); [`diagnostics::DiagnosticsReporter`] and [`reset::ResetCoordinator`]
//! read and mutate the same store independently.
//!
//! ## Modules
//!
//! - `bucket` - maps timestamps to day buckets under one reference timezone
//! - `store` - counter store contract plus memory and file backends
//! - `aggregator` - claim-before-write rollup of completed days
//! - `diagnostics` - read-only snapshot of counters, runs and anomalies
//! - `reset` - audited forced reset of live counters
//! - `config` - engine tunables loaded from TOML
//! - `clock` - injectable time source

pub mod aggregator;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reset;
pub mod store;

pub use aggregator::{AggregationOutcome, Aggregator};
pub use bucket::{BucketResolver, DayBucket};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use diagnostics::{DiagnosticSnapshot, DiagnosticsReporter};
pub use error::{EngineError, EngineResult};
pub use reset::ResetCoordinator;
pub use store::{CounterStore, FileCounterStore, MemoryCounterStore, ResetScope};
