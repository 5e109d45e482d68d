//! Broker error types and the retry classification seam
//!
//! - `BrokerError`: failures talking to the message broker
//! - `RetryableError`: what the retry policy needs to know about a job failure

use std::time::Duration;
use thiserror::Error;

/// Message broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Reached the end of a partition; not a failure
    #[error("End of partition {topic}[{partition}]")]
    PartitionEof { topic: String, partition: i32 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Producer did not drain in time
    #[error("Flush timed out after {0:?}")]
    FlushTimeout(Duration),

    /// Operation on a closed client
    #[error("Broker client is closed")]
    Closed,

    /// Anything the adapter cannot express otherwise
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// True for the "no more messages in partition" condition.
    pub fn is_partition_eof(&self) -> bool {
        matches!(self, BrokerError::PartitionEof { .. })
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

/// A classified job failure, as seen by the retry policy.
///
/// Domain crates implement this for their error descriptor so the generic
/// retry/DLQ path can decide between re-publishing and dead-lettering.
pub trait RetryableError: std::fmt::Display + Send + Sync {
    /// Stable machine-readable error code.
    fn code(&self) -> &str;

    /// Whether a later attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Human readable message.
    fn message(&self) -> String {
        self.to_string()
    }
}
