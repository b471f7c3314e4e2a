//! The unified error type for the aggregation engine
//!
//! Note that "too early", "already aggregated" and "in progress" are not
//! errors: they are ordinary aggregation outcomes and live on
//! [`crate::aggregator::AggregationOutcome`].

use thiserror::Error;

use crate::bucket::DayBucket;
use crate::store::{RunId, StoreError};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An aggregation run started and then failed; the run record carries
    /// the same detail for the diagnostics reporter
    #[error("aggregation of {day} failed (run {run_id}): {message}")]
    AggregationFailed {
        day: DayBucket,
        run_id: RunId,
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn config<E: std::fmt::Display>(msg: E) -> Self {
        Self::Config(msg.to_string())
    }

    /// Whether the external scheduler should retry with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::AggregationFailed { .. } => true,
            Self::Config(_) => false,
        }
    }
}
