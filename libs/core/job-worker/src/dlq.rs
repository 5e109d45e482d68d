//! Dead-letter record
//!
//! Published once per terminally failed message. Field names are camelCase
//! and unknown fields are rejected on read.

use crate::error::RetryableError;
use crate::event::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DLQ entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DlqRecord {
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub failed_at: DateTime<Utc>,
    /// Pipeline stage that failed (e.g. `DOWNLOAD`)
    pub failure_stage: String,
    /// Original job payload, `null` when it could not be decoded
    pub job: Option<Value>,
    pub error_code: String,
    pub error_message: String,
    #[serde(default)]
    pub attempt: u32,
}

impl DlqRecord {
    pub fn new<E: RetryableError + ?Sized>(
        item: &WorkItem,
        failure_stage: &str,
        error: &E,
        job: Option<Value>,
    ) -> Self {
        Self {
            original_topic: item.message.topic.clone(),
            original_partition: item.message.partition,
            original_offset: item.message.offset,
            failed_at: Utc::now(),
            failure_stage: failure_stage.to_string(),
            job,
            error_code: error.code().to_string(),
            error_message: error.message(),
            attempt: item.attempt,
        }
    }
}
