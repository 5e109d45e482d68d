//! Worker configuration
//!
//! This module provides `WorkerConfig` for the coordinator and worker pool.

use std::time::Duration;

/// Configuration for the consumption loop and worker pool
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Topic (stream) to consume jobs from
    pub topic: String,

    /// Number of worker tasks (minimum 1)
    pub concurrency: usize,

    /// Intake queue capacity (minimum 1)
    pub queue_capacity: usize,

    /// Upper bound for a single broker poll
    pub poll_timeout: Duration,

    /// Pause after a broker error before polling again
    pub error_backoff: Duration,
}

impl WorkerConfig {
    /// Create a new WorkerConfig with defaults for everything but the topic
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            concurrency: 1,
            queue_capacity: 4,
            poll_timeout: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Set the number of workers
    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.concurrency = count.max(1);
        self
    }

    /// Set the intake queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the pause after broker errors
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("stt.jobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.topic, "stt.jobs");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.poll_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new("jobs")
            .with_concurrency(8)
            .with_queue_capacity(16)
            .with_poll_timeout(Duration::from_millis(100))
            .with_error_backoff(Duration::from_millis(50));

        assert_eq!(config.topic, "jobs");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.error_backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_minimums_enforced() {
        let config = WorkerConfig::new("jobs")
            .with_concurrency(0)
            .with_queue_capacity(0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.queue_capacity, 1);
    }
}
