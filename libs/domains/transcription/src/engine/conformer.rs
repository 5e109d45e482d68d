use super::{EngineKind, Transcript, TranscriptionEngine, request_error};
use crate::audio::NormalizedAudio;
use crate::error::{ErrorCode, ErrorInfo};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

/// Conformer inference server configuration
#[derive(Debug, Clone)]
pub struct ConformerConfig {
    pub base_url: String,
    pub model_id: String,
    /// Decoder strategy (`rnnt` or `ctc`)
    pub decoding: String,
}

impl ConformerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: "ai4bharat/indic-conformer-600m-multilingual".to_string(),
            decoding: "rnnt".to_string(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_decoding(mut self, decoding: impl Into<String>) -> Self {
        self.decoding = decoding.into();
        self
    }
}

/// Indic conformer adapter: posts the raw WAV body with the language and
/// decoder as query parameters.
pub struct ConformerEngine {
    client: Client,
    config: ConformerConfig,
}

impl ConformerEngine {
    pub fn new(client: Client, config: ConformerConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Deserialize)]
struct ConformerResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[async_trait]
impl TranscriptionEngine for ConformerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::IndicConformer
    }

    fn model_version(&self) -> String {
        self.config.model_id.clone()
    }

    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        language: &str,
    ) -> Result<Transcript, ErrorInfo> {
        let body = tokio::fs::read(&audio.path).await?;

        let response = self
            .client
            .post(format!(
                "{}/v1/transcribe",
                self.config.base_url.trim_end_matches('/')
            ))
            .query(&[("language", language), ("decoding", self.config.decoding.as_str())])
            .header(CONTENT_TYPE, "audio/wav")
            .body(body)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ErrorInfo::new(
                ErrorCode::TranscribeFailed,
                format!("conformer returned HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        let parsed: ConformerResponse = response
            .json()
            .await
            .map_err(|e| request_error(self.kind(), e))?;

        Ok(Transcript::new(
            &parsed.text,
            parsed.language.or_else(|| Some(language.to_string())),
            parsed.confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn audio(dir: &tempfile::TempDir) -> NormalizedAudio {
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"RIFF....WAVE").unwrap();
        NormalizedAudio {
            path,
            duration_secs: 1.0,
        }
    }

    #[tokio::test]
    async fn test_transcribe_sends_language_and_decoding() {
        let router = Router::new().route(
            "/v1/transcribe",
            post(|Query(params): Query<HashMap<String, String>>, body: axum::body::Bytes| async move {
                assert_eq!(params.get("decoding").map(String::as_str), Some("ctc"));
                assert_eq!(&body[..], b"RIFF....WAVE");
                axum::Json(serde_json::json!({
                    "text": format!(" namaste  {} ", params["language"]),
                    "confidence": 0.8
                }))
            }),
        );
        let base = serve(router).await;
        let dir = tempfile::tempdir().unwrap();

        let engine = ConformerEngine::new(
            Client::new(),
            ConformerConfig::new(base).with_decoding("ctc"),
        );
        let transcript = engine.transcribe(&audio(&dir), "hi").await.unwrap();

        assert_eq!(transcript.text.as_deref(), Some("namaste hi"));
        assert_eq!(transcript.language.as_deref(), Some("hi"));
        assert_eq!(transcript.confidence, Some(0.8));
    }

    #[tokio::test]
    async fn test_server_error_is_transcribe_failed() {
        let router = Router::new().route(
            "/v1/transcribe",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "cuda out of memory") }),
        );
        let base = serve(router).await;
        let dir = tempfile::tempdir().unwrap();

        let engine = ConformerEngine::new(Client::new(), ConformerConfig::new(base));
        let err = engine.transcribe(&audio(&dir), "mr").await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::TranscribeFailed);
        assert!(err.retryable());
        assert!(err.message().contains("cuda out of memory"));
    }
}
