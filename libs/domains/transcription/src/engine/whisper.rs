use super::{EngineKind, Transcript, TranscriptionEngine, request_error};
use crate::audio::NormalizedAudio;
use crate::error::{ErrorCode, ErrorInfo};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// faster-whisper server configuration (OpenAI-compatible API)
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub base_url: String,
    /// Model size, e.g. `small` or `large-v3`
    pub model_size: String,
}

impl WhisperConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_size: "small".to_string(),
        }
    }

    pub fn with_model_size(mut self, model_size: impl Into<String>) -> Self {
        self.model_size = model_size.into();
        self
    }
}

pub struct WhisperEngine {
    client: Client,
    config: WhisperConfig,
}

impl WhisperEngine {
    pub fn new(client: Client, config: WhisperConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    language_probability: Option<f64>,
}

#[async_trait]
impl TranscriptionEngine for WhisperEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::FasterWhisper
    }

    fn model_version(&self) -> String {
        format!("faster-whisper-{}", self.config.model_size)
    }

    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        language: &str,
    ) -> Result<Transcript, ErrorInfo> {
        let bytes = tokio::fs::read(&audio.path).await?;
        let file = Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| request_error(self.kind(), e))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.config.model_size.clone())
            .text("language", language.to_string())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(format!(
                "{}/v1/audio/transcriptions",
                self.config.base_url.trim_end_matches('/')
            ))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ErrorInfo::new(
                ErrorCode::TranscribeFailed,
                format!("faster-whisper returned HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        let parsed: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| request_error(self.kind(), e))?;

        Ok(Transcript::new(
            &parsed.text,
            parsed.language,
            parsed.language_probability,
        ))
    }
}
