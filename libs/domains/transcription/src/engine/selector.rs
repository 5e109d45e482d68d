//! Primary/fallback engine selection.

use super::{EngineFactory, EngineKind, Transcript, TranscriptionEngine, language};
use crate::audio::NormalizedAudio;
use crate::error::{ErrorCode, ErrorInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SelectorOptions {
    pub fallback_enabled: bool,
    pub default_language: String,
    /// Per-engine inference timeout
    pub timeout: Duration,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            default_language: "mr".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Transcript plus the engine that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub transcript: Transcript,
    pub engine: EngineKind,
    pub model_version: String,
    pub fallback_used: bool,
}

pub struct EngineSelector {
    primary: Arc<dyn TranscriptionEngine>,
    fallback: Option<Arc<dyn TranscriptionEngine>>,
    options: SelectorOptions,
}

impl EngineSelector {
    pub fn new(
        primary: Arc<dyn TranscriptionEngine>,
        fallback: Option<Arc<dyn TranscriptionEngine>>,
        options: SelectorOptions,
    ) -> Self {
        Self {
            primary,
            fallback,
            options,
        }
    }

    /// Build the engines for `requested`, degrading when construction fails.
    ///
    /// - `faster-whisper` requested: single engine, no fallback
    /// - conformer fails, fallback enabled: faster-whisper becomes primary
    /// - fallback fails: continue with the conformer alone
    /// - nothing usable: `MODEL_LOAD_FAILED`
    pub async fn initialize(
        factory: &dyn EngineFactory,
        requested: EngineKind,
        options: SelectorOptions,
    ) -> Result<Self, ErrorInfo> {
        if requested == EngineKind::FasterWhisper {
            let primary = factory
                .create(EngineKind::FasterWhisper)
                .await
                .map_err(as_model_load_failure)?;
            return Ok(Self::new(primary, None, options));
        }

        let primary = match factory.create(EngineKind::IndicConformer).await {
            Ok(engine) => engine,
            Err(e) if options.fallback_enabled => {
                warn!(
                    engine = %EngineKind::FasterWhisper,
                    error_code = %e.code(),
                    error = %e.message(),
                    fallback_used = true,
                    "Conformer init failed, falling back to faster-whisper"
                );
                let primary = factory
                    .create(EngineKind::FasterWhisper)
                    .await
                    .map_err(as_model_load_failure)?;
                return Ok(Self::new(primary, None, options));
            }
            Err(e) => return Err(as_model_load_failure(e)),
        };

        let fallback = if options.fallback_enabled {
            match factory.create(EngineKind::FasterWhisper).await {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!(
                        engine = %EngineKind::IndicConformer,
                        error_code = %e.code(),
                        error = %e.message(),
                        "Fallback engine init failed, continuing without fallback"
                    );
                    None
                }
            }
        } else {
            None
        };

        info!(
            engine = %primary.kind(),
            fallback = fallback.is_some(),
            "Engines initialized"
        );
        Ok(Self::new(primary, fallback, options))
    }

    pub fn primary_kind(&self) -> EngineKind {
        self.primary.kind()
    }

    pub fn model_version(&self) -> String {
        self.primary.model_version()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn resolve_language(&self, hint: Option<&str>) -> String {
        language::resolve(hint, &self.options.default_language)
    }

    /// Transcribe with the primary engine, retrying once on the fallback when
    /// the primary is the conformer and fallback is enabled.
    pub async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        language: &str,
    ) -> Result<Transcription, ErrorInfo> {
        let primary_error = match self.run(&self.primary, audio, language).await {
            Ok(transcription) => return Ok(transcription),
            Err(e) => e,
        };

        let fallback = match &self.fallback {
            Some(fallback)
                if self.options.fallback_enabled
                    && self.primary.kind() == EngineKind::IndicConformer =>
            {
                fallback
            }
            _ => return Err(primary_error),
        };

        warn!(
            engine = %self.primary.kind(),
            lang = %language,
            error_code = %primary_error.code(),
            fallback_used = true,
            "Primary engine failed, attempting fallback"
        );
        let mut transcription = self.run(fallback, audio, language).await?;
        transcription.fallback_used = true;
        Ok(transcription)
    }

    async fn run(
        &self,
        engine: &Arc<dyn TranscriptionEngine>,
        audio: &NormalizedAudio,
        language: &str,
    ) -> Result<Transcription, ErrorInfo> {
        let transcript = tokio::time::timeout(self.options.timeout, engine.transcribe(audio, language))
            .await
            .map_err(|_| {
                ErrorInfo::new(
                    ErrorCode::TranscribeTimeout,
                    format!(
                        "Transcription timed out after {}s",
                        self.options.timeout.as_secs_f64()
                    ),
                )
            })??;

        Ok(Transcription {
            transcript,
            engine: engine.kind(),
            model_version: engine.model_version(),
            fallback_used: false,
        })
    }
}

impl std::fmt::Debug for EngineSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSelector")
            .field("primary", &self.primary.kind())
            .field("fallback", &self.fallback.as_ref().map(|e| e.kind()))
            .field("options", &self.options)
            .finish()
    }
}

fn as_model_load_failure(err: ErrorInfo) -> ErrorInfo {
    if err.code() == ErrorCode::ModelLoadFailed {
        err
    } else {
        ErrorInfo::new(ErrorCode::ModelLoadFailed, err.message())
    }
}
