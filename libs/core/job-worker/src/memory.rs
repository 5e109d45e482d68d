//! In-memory broker
//!
//! Single-process stand-in for the message broker. Messages pushed with
//! [`MemoryBroker::push`] are delivered to the consumer in order; everything a
//! producer sends is recorded for inspection. Commits, pauses and resumes are
//! recorded too.

use crate::broker::{BrokerConsumer, BrokerMessage, BrokerProducer, Headers};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Idle wait used when nothing is deliverable, capped by the poll timeout.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// A message recorded by [`MemoryProducer::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<BrokerMessage>,
    next_offset: HashMap<String, i64>,
    subscribed: Vec<String>,
    sent: Vec<SentRecord>,
    committed: Vec<BrokerMessage>,
    paused: bool,
    pause_count: usize,
    resume_count: usize,
    fail_sends: bool,
    fail_polls: bool,
    eof_polls: bool,
    fail_commits: bool,
    poll_count: usize,
    failed_commits: usize,
    closed: bool,
}

/// Shared handle to an in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
        }
    }

    /// Enqueue a message on partition 0 of `topic` and return its offset.
    pub fn push(&self, topic: &str, key: Option<&str>, payload: &[u8], headers: Headers) -> i64 {
        let mut state = self.lock();
        let offset = {
            let next = state.next_offset.entry(topic.to_string()).or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };
        state.queue.push_back(BrokerMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: key.map(str::to_string),
            payload: payload.to_vec(),
            headers,
            id: format!("{topic}-0-{offset}"),
        });
        offset
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Make every subsequent poll fail with a broker error.
    pub fn fail_polls(&self, fail: bool) {
        self.lock().fail_polls = fail;
    }

    /// Make every subsequent poll report end-of-partition.
    pub fn eof_polls(&self, eof: bool) {
        self.lock().eof_polls = eof;
    }

    /// Make every subsequent commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.lock().fail_commits = fail;
    }

    /// Polls attempted so far, failed ones included.
    pub fn poll_count(&self) -> usize {
        self.lock().poll_count
    }

    /// Commits rejected by [`MemoryBroker::fail_commits`].
    pub fn failed_commits(&self) -> usize {
        self.lock().failed_commits
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<SentRecord> {
        self.lock()
            .sent
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    /// Committed messages, in commit order.
    pub fn committed(&self) -> Vec<BrokerMessage> {
        self.lock().committed.clone()
    }

    pub fn committed_offsets(&self) -> Vec<i64> {
        self.lock().committed.iter().map(|m| m.offset).collect()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn pause_count(&self) -> usize {
        self.lock().pause_count
    }

    pub fn resume_count(&self) -> usize {
        self.lock().resume_count
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Consumer half of [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        self.broker.lock().subscribed = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let (next, eof_topic) = {
            let mut state = self.broker.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.poll_count += 1;
            if state.fail_polls {
                return Err(BrokerError::Other("poll rejected".to_string()));
            }
            if state.eof_polls {
                (None, Some(state.subscribed.first().cloned().unwrap_or_default()))
            } else if state.paused {
                (None, None)
            } else {
                let subscribed = state.subscribed.clone();
                let position = state
                    .queue
                    .iter()
                    .position(|m| subscribed.iter().any(|t| *t == m.topic));
                (position.and_then(|i| state.queue.remove(i)), None)
            }
        };

        if next.is_none() {
            tokio::time::sleep(timeout.min(IDLE_POLL)).await;
        }
        if let Some(topic) = eof_topic {
            return Err(BrokerError::PartitionEof {
                topic,
                partition: 0,
            });
        }
        Ok(next)
    }

    async fn pause(&mut self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.paused = true;
        state.pause_count += 1;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.paused = false;
        state.resume_count += 1;
        Ok(())
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if state.fail_commits {
            state.failed_commits += 1;
            return Err(BrokerError::Other(format!(
                "commit of {} rejected",
                message.id
            )));
        }
        state.committed.push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.broker.lock().closed = true;
        Ok(())
    }
}

/// Producer half of [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if state.fail_sends {
            return Err(BrokerError::Other(format!("send to {topic} rejected")));
        }
        state.sent.push(SentRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            value: value.to_vec(),
            headers: headers.clone(),
        });
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}
