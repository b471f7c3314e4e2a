//! Error types for the counter store abstraction

use std::fmt;
use thiserror::Error;

use crate::bucket::DayBucket;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Counter store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Store backend unavailable (transient infrastructure failure)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Increment arrived for a day whose aggregate is already final
    #[error("Stale write rejected: counter '{metric}' for {day} is archived")]
    StaleWrite { metric: String, day: DayBucket },

    /// Concurrent modification conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Create a serialization error
    pub fn serialization<E: fmt::Display>(err: E) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create a stale-write rejection
    pub fn stale_write(metric: impl Into<String>, day: DayBucket) -> Self {
        Self::StaleWrite {
            metric: metric.into(),
            day,
        }
    }

    /// Create a conflict error
    pub fn conflict<E: fmt::Display>(msg: E) -> Self {
        Self::Conflict(msg.to_string())
    }

    /// Create a not found error
    pub fn not_found<E: fmt::Display>(item: E) -> Self {
        Self::NotFound(item.to_string())
    }

    /// Whether the external caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }

    /// Whether this is a concurrent-modification conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this is a rejected late increment
    pub fn is_stale_write(&self) -> bool {
        matches!(self, Self::StaleWrite { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
