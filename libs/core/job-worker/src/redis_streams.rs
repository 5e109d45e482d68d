//! Redis Streams broker adapter
//!
//! Maps the broker contract onto a single-stream consumer group:
//! - `subscribe` creates the group (`XGROUP CREATE ... MKSTREAM`)
//! - `poll` first replays this consumer's pending entries, then reads new ones
//! - entries left pending by other consumers longer than the claim idle time
//!   are taken over with `XCLAIM`, on the first poll and then periodically
//! - `commit` acknowledges the entry (`XACK`)
//! - `pause` / `resume` gate reads locally
//!
//! Entries carry the payload in the `job` field, the key in `key` and every
//! other field as a header. Redis streams have a single partition, so
//! partition is always 0 and offsets are assigned locally in delivery order.

use crate::backoff::Backoff;
use crate::broker::{BrokerConsumer, BrokerMessage, BrokerProducer, Headers};
use crate::error::BrokerError;
use async_trait::async_trait;
use redis::{Client, RedisResult};
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PAYLOAD_FIELD: &str = "job";
const KEY_FIELD: &str = "key";

const CLAIM_BATCH: usize = 100;

type StreamEntry = (String, Vec<(String, Vec<u8>)>);
type StreamReply = Vec<(String, Vec<StreamEntry>)>;

/// Open a connection manager and verify it with `PING`, retrying with
/// `backoff` up to `attempts` times.
pub async fn connect_with_retry(
    url: &str,
    attempts: u32,
    backoff: &Backoff,
) -> Result<ConnectionManager, BrokerError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect(url).await {
            Ok(manager) => {
                info!(attempt, "Connected to Redis");
                return Ok(manager);
            }
            Err(e) if attempt < attempts => {
                let delay = backoff.delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Redis connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn connect(url: &str) -> RedisResult<ConnectionManager> {
    let manager = ConnectionManager::new(Client::open(url)?).await?;
    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(manager)
}

/// Consumer-group reader over one stream.
pub struct RedisStreamConsumer {
    redis: ConnectionManager,
    group: String,
    consumer_id: String,
    stream: String,
    /// Cursor into this consumer's pending list; `None` once replayed.
    pending_cursor: Option<String>,
    next_offset: i64,
    paused: bool,
    claim_idle: Duration,
    /// `None` until the first claim pass.
    last_claim: Option<Instant>,
    claimed: VecDeque<BrokerMessage>,
}

impl RedisStreamConsumer {
    pub fn new(redis: ConnectionManager, group: impl Into<String>) -> Self {
        Self {
            redis,
            group: group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            stream: String::new(),
            pending_cursor: Some("0".to_string()),
            next_offset: 0,
            paused: false,
            claim_idle: Duration::from_secs(300),
            last_claim: None,
            claimed: VecDeque::new(),
        }
    }

    /// Minimum idle time before another consumer's pending entry is claimed.
    /// The claim pass runs every twice this interval.
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    /// Use a stable consumer name so pending entries survive restarts.
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    async fn ensure_group(&mut self, stream: &str) -> Result<(), BrokerError> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.redis)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(BrokerError::Redis(e)),
        }
    }

    async fn read(&mut self, id: &str, block: Option<Duration>) -> Result<Option<BrokerMessage>, BrokerError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&self.group).arg(&self.consumer_id);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("COUNT").arg(1).arg("STREAMS").arg(&self.stream).arg(id);

        let reply: RedisResult<Option<StreamReply>> = cmd.query_async(&mut self.redis).await;
        let reply = match reply {
            Ok(reply) => reply.unwrap_or_default(),
            Err(e) if e.to_string().contains("NOGROUP") => {
                warn!(group = %self.group, "Consumer group missing, recreating");
                let stream = self.stream.clone();
                self.ensure_group(&stream).await?;
                return Ok(None);
            }
            Err(e) => return Err(BrokerError::Redis(e)),
        };

        for (stream, entries) in reply {
            if let Some((entry_id, fields)) = entries.into_iter().next() {
                return Ok(Some(self.to_message(stream, entry_id, fields)));
            }
        }
        Ok(None)
    }

    fn claim_due(&self) -> bool {
        self.last_claim
            .map_or(true, |at| at.elapsed() >= self.claim_idle * 2)
    }

    /// Claim entries that other consumers left pending for longer than
    /// `claim_idle`.
    async fn claim_abandoned(&mut self) -> Result<Vec<BrokerMessage>, BrokerError> {
        let pending: RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(CLAIM_BATCH)
            .query_async(&mut self.redis)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(vec![]),
            Err(e) => return Err(BrokerError::Redis(e)),
        };

        let min_idle_ms = self.claim_idle.as_millis() as i64;
        let claim_ids: Vec<String> = pending
            .into_iter()
            .filter(|(_, owner, idle, _)| *idle >= min_idle_ms && *owner != self.consumer_id)
            .map(|(id, _, _, _)| id)
            .collect();

        if claim_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer_id)
            .arg(min_idle_ms);
        for id in &claim_ids {
            cmd.arg(id);
        }

        // Entries trimmed from the stream come back as nil.
        let entries: Vec<Option<StreamEntry>> = cmd.query_async(&mut self.redis).await?;
        let stream = self.stream.clone();
        let messages: Vec<BrokerMessage> = entries
            .into_iter()
            .flatten()
            .map(|(id, fields)| self.to_message(stream.clone(), id, fields))
            .collect();

        if !messages.is_empty() {
            warn!(
                count = messages.len(),
                consumer_id = %self.consumer_id,
                "Claimed abandoned messages"
            );
        }
        Ok(messages)
    }

    fn to_message(&mut self, stream: String, id: String, fields: Vec<(String, Vec<u8>)>) -> BrokerMessage {
        let mut payload = Vec::new();
        let mut key = None;
        let mut headers = Headers::new();
        for (name, value) in fields {
            match name.as_str() {
                PAYLOAD_FIELD => payload = value,
                KEY_FIELD => key = Some(String::from_utf8_lossy(&value).into_owned()),
                _ => {
                    headers.insert(name, String::from_utf8_lossy(&value).into_owned());
                }
            }
        }

        let offset = self.next_offset;
        self.next_offset += 1;
        BrokerMessage {
            topic: stream,
            partition: 0,
            offset,
            key,
            payload,
            headers,
            id,
        }
    }
}

#[async_trait]
impl BrokerConsumer for RedisStreamConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let [stream] = topics else {
            return Err(BrokerError::Other(format!(
                "expected exactly one stream, got {}",
                topics.len()
            )));
        };
        self.stream = stream.clone();
        self.ensure_group(stream).await?;
        info!(
            stream = %self.stream,
            group = %self.group,
            consumer_id = %self.consumer_id,
            "Subscribed to streams"
        );
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.paused {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        if let Some(message) = self.claimed.pop_front() {
            return Ok(Some(message));
        }

        if let Some(cursor) = self.pending_cursor.clone() {
            match self.read(&cursor, None).await? {
                Some(message) => {
                    self.pending_cursor = Some(message.id.clone());
                    debug!(id = %message.id, "Replaying pending entry");
                    return Ok(Some(message));
                }
                None => self.pending_cursor = None,
            }
        }

        if self.claim_due() {
            self.last_claim = Some(Instant::now());
            match self.claim_abandoned().await {
                Ok(claimed) => self.claimed.extend(claimed),
                Err(e) => warn!(error = %e, "Failed to claim abandoned messages"),
            }
        }
        if let Some(message) = self.claimed.pop_front() {
            return Ok(Some(message));
        }

        self.read(">", Some(timeout)).await
    }

    async fn pause(&mut self) -> Result<(), BrokerError> {
        self.paused = true;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), BrokerError> {
        self.paused = false;
        Ok(())
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&message.topic)
            .arg(&self.group)
            .arg(&message.id)
            .query_async(&mut self.redis)
            .await?;
        debug!(stream_id = %message.id, "Acknowledged message");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        info!(consumer_id = %self.consumer_id, "Closing stream consumer");
        Ok(())
    }
}

/// Stream producer (`XADD` with approximate trimming).
#[derive(Clone)]
pub struct RedisStreamProducer {
    redis: ConnectionManager,
    max_length: i64,
}

impl RedisStreamProducer {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            max_length: 100_000,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }
}

#[async_trait]
impl BrokerProducer for RedisStreamProducer {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(value);
        if let Some(key) = key {
            cmd.arg(KEY_FIELD).arg(key);
        }
        for (name, value) in headers {
            cmd.arg(name).arg(value);
        }

        let id: String = cmd.query_async(&mut conn).await?;
        debug!(stream = %topic, id = %id, "Published message");
        Ok(())
    }

    /// `XADD` is acknowledged synchronously, so there is nothing to drain.
    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}
