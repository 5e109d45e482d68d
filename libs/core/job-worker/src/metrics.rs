//! Prometheus metrics for the job worker
//!
//! Provides observability into intake, commits and retry routing.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Worker metrics helper, labelled by topic
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    topic: String,
}

impl WorkerMetrics {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record a message pulled from the broker
    pub fn message_received(&self) {
        counter!("worker_messages_received_total", "topic" => self.topic.clone()).increment(1);
    }

    /// Record an offset commit
    pub fn committed(&self) {
        counter!("worker_commits_total", "topic" => self.topic.clone()).increment(1);
    }

    /// Record a failed commit
    pub fn commit_failed(&self) {
        counter!("worker_commit_errors_total", "topic" => self.topic.clone()).increment(1);
    }

    /// Record a broker poll error
    pub fn broker_error(&self) {
        counter!("worker_broker_errors_total", "topic" => self.topic.clone()).increment(1);
    }

    /// Update the intake queue depth
    pub fn intake_depth(&self, depth: usize) {
        gauge!("worker_intake_depth", "topic" => self.topic.clone()).set(depth as f64);
    }

    /// Update the consumer pause flag
    pub fn consumer_paused(&self, paused: bool) {
        gauge!("worker_consumer_paused", "topic" => self.topic.clone())
            .set(if paused { 1.0 } else { 0.0 });
    }

    /// Record a job re-published for retry
    pub fn retry_scheduled(&self, code: &str) {
        counter!(
            "worker_retries_total",
            "topic" => self.topic.clone(),
            "code" => code.to_string()
        )
        .increment(1);
    }

    /// Record a job moved to the DLQ
    pub fn dead_lettered(&self, code: &str) {
        counter!(
            "worker_dead_letters_total",
            "topic" => self.topic.clone(),
            "code" => code.to_string()
        )
        .increment(1);
    }

    /// Record an outcome that was left uncommitted for redelivery
    pub fn redelivered(&self) {
        counter!("worker_redeliveries_total", "topic" => self.topic.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = WorkerMetrics::new("stt.jobs");
        assert_eq!(metrics.topic(), "stt.jobs");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = WorkerMetrics::new("stt.jobs");
        metrics.message_received();
        metrics.intake_depth(3);
        metrics.consumer_paused(true);
        metrics.retry_scheduled("DOWNLOAD_FAILED");
    }

    #[test]
    fn test_render_before_init_is_empty() {
        if prometheus_handle().is_none() {
            assert!(render_metrics().is_empty());
        }
    }
}
