//! Wire schemas for the jobs and results topics.
//!
//! Jobs are lenient: unknown attributes are kept in [`Job::extra`] and survive
//! a retry round-trip. Results are strict and reject unknown fields.

use crate::engine::Transcript;
use crate::error::{ErrorCode, ErrorInfo};
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

/// Transcription job, as consumed from the jobs topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub task_id: String,
    /// Absolute http(s) URL of the source audio
    pub audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Attributes this worker does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    /// Bind and validate an already-decoded payload.
    pub fn from_value(value: Value) -> Result<Self, ErrorInfo> {
        let job: Job = serde_json::from_value(value)?;
        job.validate()?;
        Ok(job)
    }

    /// Decode and validate raw payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, ErrorInfo> {
        Self::from_value(decode_payload(payload)?)
    }

    fn validate(&self) -> Result<(), ErrorInfo> {
        let url = Url::parse(&self.audio_url).map_err(|e| {
            ErrorInfo::new(
                ErrorCode::InvalidPayload,
                format!("audioUrl is not a valid URL: {e}"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ErrorInfo::new(
                ErrorCode::InvalidPayload,
                format!("audioUrl must be an http(s) URL, got {}", self.audio_url),
            ));
        }
        Ok(())
    }
}

/// Decode the payload as JSON without binding it to [`Job`].
///
/// The decoded value is what ends up in DLQ records, so a payload that is
/// valid JSON but not a valid job is still preserved.
pub fn decode_payload(payload: &[u8]) -> Result<Value, ErrorInfo> {
    if payload.is_empty() {
        return Err(ErrorInfo::new(ErrorCode::InvalidPayload, "Empty payload"));
    }
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Terminal outcome of a job, published on the results topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TranscriptionResult {
    pub job_id: String,
    pub task_id: String,
    pub status: ResultStatus,
    pub transcript_text: Option<String>,
    pub detected_language: Option<String>,
    pub confidence: Option<f64>,
    pub engine: String,
    pub model_version: String,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl TranscriptionResult {
    pub fn completed(job: &Job, transcript: &Transcript, engine: &str, model_version: &str) -> Self {
        Self {
            job_id: job.job_id.clone(),
            task_id: job.task_id.clone(),
            status: ResultStatus::Completed,
            transcript_text: transcript.text.clone(),
            detected_language: transcript.language.clone(),
            confidence: transcript.confidence,
            engine: engine.to_string(),
            model_version: model_version.to_string(),
            error_code: None,
            error_message: None,
            completed_at: Utc::now(),
            correlation_id: job.correlation_id.clone(),
        }
    }

    pub fn failed(job: &Job, error: &ErrorInfo, engine: &str, model_version: &str) -> Self {
        Self {
            job_id: job.job_id.clone(),
            task_id: job.task_id.clone(),
            status: ResultStatus::Failed,
            transcript_text: None,
            detected_language: None,
            confidence: None,
            engine: engine.to_string(),
            model_version: model_version.to_string(),
            error_code: Some(error.code()),
            error_message: Some(error.message().to_string()),
            completed_at: Utc::now(),
            correlation_id: job.correlation_id.clone(),
        }
    }
}
