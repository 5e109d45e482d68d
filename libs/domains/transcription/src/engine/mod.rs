//! Transcription engines
//!
//! Each engine is an adapter over one inference server with one request
//! shape. [`EngineSelector`] wraps a primary and an optional fallback engine.

mod conformer;
pub mod language;
mod selector;
mod whisper;

pub use conformer::{ConformerConfig, ConformerEngine};
pub use selector::{EngineSelector, SelectorOptions, Transcription};
pub use whisper::{WhisperConfig, WhisperEngine};

use crate::audio::NormalizedAudio;
use crate::error::{ErrorCode, ErrorInfo};
use async_trait::async_trait;
use reqwest::Client;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tracing::info;

/// Engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum EngineKind {
    #[strum(to_string = "indic-conformer", serialize = "indicconformer")]
    IndicConformer,
    #[strum(to_string = "faster-whisper", serialize = "fasterwhisper")]
    FasterWhisper,
}

impl EngineKind {
    /// Parse a configured engine name; unknown names select the conformer.
    pub fn from_config(value: &str) -> Self {
        EngineKind::from_str(value.trim()).unwrap_or(EngineKind::IndicConformer)
    }
}

/// Engine output with normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Whitespace-collapsed text, `None` when nothing was recognized
    pub text: Option<String>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
}

impl Transcript {
    pub fn new(text: &str, language: Option<String>, confidence: Option<f64>) -> Self {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            text: (!text.is_empty()).then_some(text),
            language,
            confidence,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn model_version(&self) -> String;

    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        language: &str,
    ) -> Result<Transcript, ErrorInfo>;
}

/// Builds engines at startup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Construct an engine and check its health; fails with `MODEL_LOAD_FAILED`.
    async fn create(&self, kind: EngineKind) -> Result<Arc<dyn TranscriptionEngine>, ErrorInfo>;
}

/// Factory for the HTTP inference-server adapters.
#[derive(Debug, Clone)]
pub struct HttpEngineFactory {
    client: Client,
    conformer: ConformerConfig,
    whisper: WhisperConfig,
    check_timeout: Duration,
}

impl HttpEngineFactory {
    pub fn new(client: Client, conformer: ConformerConfig, whisper: WhisperConfig) -> Self {
        Self {
            client,
            conformer,
            whisper,
            check_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    async fn check_health(&self, kind: EngineKind, base_url: &str) -> Result<(), ErrorInfo> {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(self.check_timeout)
            .send()
            .await
            .map_err(|e| model_load_failed(kind, e.to_string()))?;

        if !response.status().is_success() {
            return Err(model_load_failed(
                kind,
                format!("health check returned HTTP {}", response.status().as_u16()),
            ));
        }
        info!(engine = %kind, url = %url, "Engine is reachable");
        Ok(())
    }
}

#[async_trait]
impl EngineFactory for HttpEngineFactory {
    async fn create(&self, kind: EngineKind) -> Result<Arc<dyn TranscriptionEngine>, ErrorInfo> {
        match kind {
            EngineKind::IndicConformer => {
                self.check_health(kind, &self.conformer.base_url).await?;
                Ok(Arc::new(ConformerEngine::new(
                    self.client.clone(),
                    self.conformer.clone(),
                )))
            }
            EngineKind::FasterWhisper => {
                self.check_health(kind, &self.whisper.base_url).await?;
                Ok(Arc::new(WhisperEngine::new(
                    self.client.clone(),
                    self.whisper.clone(),
                )))
            }
        }
    }
}

fn model_load_failed(kind: EngineKind, reason: String) -> ErrorInfo {
    ErrorInfo::new(
        ErrorCode::ModelLoadFailed,
        format!("{kind} failed to initialize: {reason}"),
    )
}

/// Map an inference-server transport failure.
pub(crate) fn request_error(kind: EngineKind, err: reqwest::Error) -> ErrorInfo {
    if err.is_timeout() {
        ErrorInfo::new(ErrorCode::TranscribeTimeout, format!("{kind} timed out: {err}"))
    } else {
        ErrorInfo::new(ErrorCode::TranscribeFailed, format!("{kind} request failed: {err}"))
    }
}
