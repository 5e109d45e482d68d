//! Broker contract
//!
//! The coordinator only talks to the broker through these two traits, so the
//! same loop runs over Redis Streams in production and an in-memory broker in
//! tests.

use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Header carrying the job-level attempt counter.
pub const ATTEMPT_HEADER: &str = "attempt";

/// Message headers (string key/value pairs).
pub type Headers = BTreeMap<String, String>;

/// A message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// Broker-native id used for acknowledgement (stream entry id for Redis).
    pub id: String,
}

impl BrokerMessage {
    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Attempt count from the `attempt` header, 0 when absent or unparseable.
    pub fn attempt(&self) -> u32 {
        self.header(ATTEMPT_HEADER)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Consuming side of the broker.
///
/// Only the coordinator holds the consumer, hence `&mut self`.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Join the consumer group for the given topics.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for one message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Stop fetching from all assigned partitions.
    async fn pause(&mut self) -> Result<(), BrokerError>;

    /// Resume fetching from all assigned partitions.
    async fn resume(&mut self) -> Result<(), BrokerError>;

    /// Synchronously commit `message.offset + 1` for its partition.
    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Leave the group and release the connection.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Producing side of the broker. Shared by every worker.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError>;

    /// Block until queued sends are delivered or `timeout` elapses.
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_headers(headers: &[(&str, &str)]) -> BrokerMessage {
        BrokerMessage {
            topic: "stt.jobs".to_string(),
            partition: 0,
            offset: 7,
            key: Some("j1".to_string()),
            payload: b"{}".to_vec(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            id: "7-0".to_string(),
        }
    }

    #[test]
    fn test_attempt_defaults_to_zero() {
        assert_eq!(message_with_headers(&[]).attempt(), 0);
    }

    #[test]
    fn test_attempt_parses_header() {
        assert_eq!(message_with_headers(&[("attempt", "2")]).attempt(), 2);
        assert_eq!(message_with_headers(&[("attempt", " 3 ")]).attempt(), 3);
    }

    #[test]
    fn test_attempt_unparseable_is_zero() {
        assert_eq!(message_with_headers(&[("attempt", "two")]).attempt(), 0);
        assert_eq!(message_with_headers(&[("attempt", "-1")]).attempt(), 0);
    }
}
