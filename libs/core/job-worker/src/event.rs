//! Work item and outcome types passed between the coordinator and workers.

use crate::broker::BrokerMessage;
use std::time::Instant;
use strum::{AsRefStr, Display};

/// A broker message handed to a worker.
///
/// Owned by the coordinator until sent on the intake queue, then by exactly
/// one worker until it comes back inside an [`Outcome`].
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub message: BrokerMessage,
    /// Attempt counter read from the message headers.
    pub attempt: u32,
    pub received_at: Instant,
}

impl WorkItem {
    pub fn new(message: BrokerMessage) -> Self {
        let attempt = message.attempt();
        Self {
            message,
            attempt,
            received_at: Instant::now(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn partition(&self) -> i32 {
        self.message.partition
    }

    pub fn offset(&self) -> i64 {
        self.message.offset
    }
}

/// Terminal state a processor reached for one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    /// Result published.
    Completed,
    /// Job id already completed recently; nothing published.
    Duplicate,
    /// Re-published to the jobs topic with an incremented attempt.
    RetryScheduled,
    /// Dead-letter record published.
    DeadLettered,
    /// The retry or dead-letter publish itself failed.
    Unresolved,
}

impl Disposition {
    /// Whether the original message may be committed.
    pub fn should_commit(self) -> bool {
        !matches!(self, Disposition::Unresolved)
    }
}

/// A processed work item paired with its commit decision.
#[derive(Debug)]
pub struct Outcome {
    pub item: WorkItem,
    pub disposition: Disposition,
    pub commit: bool,
}

impl Outcome {
    pub fn new(item: WorkItem, disposition: Disposition) -> Self {
        Self {
            item,
            disposition,
            commit: disposition.should_commit(),
        }
    }
}
