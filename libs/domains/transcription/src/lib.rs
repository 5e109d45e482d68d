//! Transcription Domain
//!
//! Speech-to-text jobs on top of the `job-worker` framework.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ JobProcessor │  ← validate, dedup, stage failures → retry / DLQ
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐   ┌─────────────────┐   ┌────────────────┐
//! │ AudioFetcher │ → │ AudioNormalizer │ → │ EngineSelector │
//! └──────────────┘   └─────────────────┘   └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_transcription::{EngineKind, EngineSelector, JobProcessor};
//!
//! let selector = EngineSelector::initialize(&factory, EngineKind::IndicConformer, options).await?;
//! let processor = JobProcessor::new(producer, fetcher, normalizer, Arc::new(selector), retry, config);
//! coordinator.run(Arc::new(processor), shutdown_rx).await?;
//! ```

pub mod audio;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod processor;
pub mod schema;

pub use audio::{AudioNormalizer, FfmpegNormalizer, JobFiles, NormalizedAudio};
pub use engine::{
    ConformerConfig, EngineFactory, EngineKind, EngineSelector, HttpEngineFactory,
    SelectorOptions, Transcript, Transcription, TranscriptionEngine, WhisperConfig,
};
pub use error::{ErrorCode, ErrorInfo, FailureStage, StageFailure};
pub use fetcher::{AudioFetcher, FetchedAudio, HttpAudioFetcher};
pub use processor::{JobProcessor, ProcessorConfig};
pub use schema::{Job, ResultStatus, TranscriptionResult};
