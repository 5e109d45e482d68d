//! Retry / dead-letter routing for failed jobs.
//!
//! Retryable failures below `max_attempts` are re-published to the jobs topic
//! with the attempt header incremented. Everything else becomes a
//! [`DlqRecord`]. Either way the original message may then be committed,
//! unless the publish itself failed.

use crate::backoff::Backoff;
use crate::broker::{ATTEMPT_HEADER, BrokerProducer};
use crate::dlq::DlqRecord;
use crate::error::{BrokerError, RetryableError};
use crate::event::{Disposition, WorkItem};
use crate::metrics::WorkerMetrics;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jobs_topic: String,
    dlq_topic: String,
    flush_timeout: Duration,
    metrics: WorkerMetrics,
}

impl RetryPolicy {
    pub fn new(jobs_topic: impl Into<String>, dlq_topic: impl Into<String>) -> Self {
        let jobs_topic = jobs_topic.into();
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            metrics: WorkerMetrics::new(jobs_topic.clone()),
            jobs_topic,
            dlq_topic: dlq_topic.into(),
            flush_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// Whether a failure at `attempt` gets another try.
    pub fn should_retry<E: RetryableError + ?Sized>(&self, error: &E, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Route a failed work item to retry or the DLQ.
    ///
    /// `job` is the decoded payload, if decoding got that far; it is embedded
    /// in the DLQ record and its `jobId` is used as the message key.
    pub async fn handle<E: RetryableError + ?Sized>(
        &self,
        producer: &dyn BrokerProducer,
        item: &WorkItem,
        stage: &str,
        error: &E,
        job: Option<Value>,
    ) -> Disposition {
        let key = job
            .as_ref()
            .and_then(|j| j.get("jobId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| item.message.key.clone());

        if self.should_retry(error, item.attempt) {
            let next_attempt = item.attempt + 1;
            let delay = self.backoff.delay(next_attempt);
            info!(
                job_id = ?key,
                stage = %stage,
                error_code = %error.code(),
                attempt = next_attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying job"
            );
            tokio::time::sleep(delay).await;

            return match self.republish(producer, item, key.as_deref(), next_attempt).await {
                Ok(()) => {
                    self.metrics.retry_scheduled(error.code());
                    Disposition::RetryScheduled
                }
                Err(e) => {
                    error!(job_id = ?key, error = %e, "Failed to re-publish job for retry");
                    Disposition::Unresolved
                }
            };
        }

        let record = DlqRecord::new(item, stage, error, job);
        match self.dead_letter(producer, key.as_deref(), &record).await {
            Ok(()) => {
                self.metrics.dead_lettered(error.code());
                warn!(
                    job_id = ?key,
                    stage = %stage,
                    error_code = %error.code(),
                    attempt = item.attempt,
                    dlq_topic = %self.dlq_topic,
                    "Moved job to DLQ"
                );
                Disposition::DeadLettered
            }
            Err(e) => {
                error!(job_id = ?key, error = %e, "Failed to publish DLQ record");
                Disposition::Unresolved
            }
        }
    }

    async fn republish(
        &self,
        producer: &dyn BrokerProducer,
        item: &WorkItem,
        key: Option<&str>,
        attempt: u32,
    ) -> Result<(), BrokerError> {
        let mut headers = item.message.headers.clone();
        headers.insert(ATTEMPT_HEADER.to_string(), attempt.to_string());
        producer
            .send(&self.jobs_topic, key, item.payload(), &headers)
            .await?;
        producer.flush(self.flush_timeout).await
    }

    async fn dead_letter(
        &self,
        producer: &dyn BrokerProducer,
        key: Option<&str>,
        record: &DlqRecord,
    ) -> Result<(), BrokerError> {
        let value = serde_json::to_vec(record)?;
        producer
            .send(&self.dlq_topic, key, &value, &Default::default())
            .await?;
        producer.flush(self.flush_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerMessage, Headers};
    use crate::memory::MemoryBroker;
    use std::fmt;

    struct Failure {
        code: &'static str,
        retryable: bool,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} happened", self.code)
        }
    }

    impl RetryableError for Failure {
        fn code(&self) -> &str {
            self.code
        }

        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    const TRANSIENT: Failure = Failure {
        code: "DOWNLOAD_FAILED",
        retryable: true,
    };
    const PERMANENT: Failure = Failure {
        code: "INVALID_PAYLOAD",
        retryable: false,
    };

    fn policy() -> RetryPolicy {
        RetryPolicy::new("stt.jobs", "stt.jobs.dlq")
            .with_max_attempts(3)
            .with_backoff(Backoff::from_millis(1, 2))
    }

    fn item(attempt: u32) -> WorkItem {
        let mut headers = Headers::new();
        headers.insert("attempt".to_string(), attempt.to_string());
        headers.insert("traceparent".to_string(), "abc".to_string());
        WorkItem::new(BrokerMessage {
            topic: "stt.jobs".to_string(),
            partition: 0,
            offset: 5,
            key: Some("j1".to_string()),
            payload: br#"{"jobId":"j1","custom":1}"#.to_vec(),
            headers,
            id: "5".to_string(),
        })
    }

    fn job() -> Option<Value> {
        Some(serde_json::json!({"jobId": "j1", "custom": 1}))
    }

    #[tokio::test]
    async fn test_retryable_below_max_republishes() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();

        let disposition = policy()
            .handle(&producer, &item(0), "DOWNLOAD", &TRANSIENT, job())
            .await;

        assert_eq!(disposition, Disposition::RetryScheduled);
        let retries = broker.sent_to("stt.jobs");
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].headers.get("attempt").map(String::as_str), Some("1"));
        assert_eq!(retries[0].headers.get("traceparent").map(String::as_str), Some("abc"));
        assert_eq!(retries[0].key.as_deref(), Some("j1"));
        assert_eq!(retries[0].value, br#"{"jobId":"j1","custom":1}"#.to_vec());
        assert!(broker.sent_to("stt.jobs.dlq").is_empty());
    }

    #[tokio::test]
    async fn test_retryable_at_max_dead_letters() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();

        let disposition = policy()
            .handle(&producer, &item(3), "DOWNLOAD", &TRANSIENT, job())
            .await;

        assert_eq!(disposition, Disposition::DeadLettered);
        assert!(broker.sent_to("stt.jobs").is_empty());

        let dlq = broker.sent_to("stt.jobs.dlq");
        assert_eq!(dlq.len(), 1);
        let record: DlqRecord = serde_json::from_slice(&dlq[0].value).unwrap();
        assert_eq!(record.failure_stage, "DOWNLOAD");
        assert_eq!(record.error_code, "DOWNLOAD_FAILED");
        assert_eq!(record.attempt, 3);
        assert_eq!(record.original_offset, 5);
        assert_eq!(record.job, job());
    }

    #[tokio::test]
    async fn test_non_retryable_never_republishes() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();

        let disposition = policy()
            .handle(&producer, &item(0), "VALIDATION", &PERMANENT, None)
            .await;

        assert_eq!(disposition, Disposition::DeadLettered);
        assert!(broker.sent_to("stt.jobs").is_empty());
        let dlq = broker.sent_to("stt.jobs.dlq");
        assert_eq!(dlq.len(), 1);
        // No decoded job: falls back to the message key.
        assert_eq!(dlq[0].key.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_unresolved() {
        let broker = MemoryBroker::new();
        broker.fail_sends(true);
        let producer = broker.producer();

        let retry = policy()
            .handle(&producer, &item(0), "DOWNLOAD", &TRANSIENT, job())
            .await;
        let dlq = policy()
            .handle(&producer, &item(0), "VALIDATION", &PERMANENT, job())
            .await;

        assert_eq!(retry, Disposition::Unresolved);
        assert_eq!(dlq, Disposition::Unresolved);
    }

    #[test]
    fn test_should_retry() {
        let policy = policy();
        assert!(policy.should_retry(&TRANSIENT, 0));
        assert!(policy.should_retry(&TRANSIENT, 2));
        assert!(!policy.should_retry(&TRANSIENT, 3));
        assert!(!policy.should_retry(&PERMANENT, 0));
    }
}
