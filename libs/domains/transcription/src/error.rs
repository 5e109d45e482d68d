//! Failure taxonomy for transcription jobs.
//!
//! Every stage of the pipeline reports failures as an [`ErrorInfo`]. Each
//! [`ErrorCode`] carries a default retryability that callers may override.

use job_worker::{BrokerError, RetryableError};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Machine-readable failure code carried on DLQ records and FAILED results.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPayload,
    DownloadFailed,
    DownloadTimeout,
    AudioTooLarge,
    AudioTooLong,
    UnsupportedFormat,
    TranscribeTimeout,
    TranscribeFailed,
    ModelLoadFailed,
    InternalError,
}

impl ErrorCode {
    /// Retryability used when the failure site does not decide otherwise.
    pub fn default_retryable(self) -> bool {
        !matches!(
            self,
            ErrorCode::InvalidPayload
                | ErrorCode::AudioTooLarge
                | ErrorCode::AudioTooLong
                | ErrorCode::UnsupportedFormat
                | ErrorCode::ModelLoadFailed
        )
    }
}

/// A classified failure: code, message and whether a retry may help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ErrorInfo {
    code: ErrorCode,
    message: String,
    retryable: bool,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.default_retryable(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Normalize an arbitrary error.
    ///
    /// An `ErrorInfo` found in the source chain (or inside an `io::Error`) is
    /// returned as-is; anything unrecognized becomes a retryable
    /// `INTERNAL_ERROR`.
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(info) = e.downcast_ref::<ErrorInfo>() {
                return info.clone();
            }
            current = match e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
                Some(inner) => Some(inner as &(dyn std::error::Error + 'static)),
                None => e.source(),
            };
        }
        ErrorInfo::new(ErrorCode::InternalError, err.to_string())
    }

    /// Attach the pipeline stage the failure happened in.
    pub fn at(self, stage: FailureStage) -> StageFailure {
        StageFailure { stage, error: self }
    }
}

impl RetryableError for ErrorInfo {
    fn code(&self) -> &str {
        self.code.as_ref()
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

impl From<serde_json::Error> for ErrorInfo {
    fn from(err: serde_json::Error) -> Self {
        ErrorInfo::new(ErrorCode::InvalidPayload, err.to_string())
    }
}

impl From<std::io::Error> for ErrorInfo {
    fn from(err: std::io::Error) -> Self {
        ErrorInfo::classify(&err)
    }
}

impl From<BrokerError> for ErrorInfo {
    fn from(err: BrokerError) -> Self {
        ErrorInfo::classify(&err)
    }
}

impl From<tokio::task::JoinError> for ErrorInfo {
    fn from(err: tokio::task::JoinError) -> Self {
        ErrorInfo::classify(&err)
    }
}

/// Pipeline stage reported in DLQ records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStage {
    /// Payload decoding and schema checks
    Validation,
    /// Fetching, converting and measuring the audio
    Download,
    /// Engine inference, including fallback
    Transcribe,
    /// Result publication and anything else
    Publish,
}

/// An [`ErrorInfo`] tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: FailureStage,
    pub error: ErrorInfo,
}
