//! Transcription job processor.
//!
//! Implements `job_worker::Processor`:
//! validate → dedup → fetch → normalize → transcribe → publish.
//! Every failure is tagged with its stage and handed to the retry policy; the
//! processor itself always reaches a [`Disposition`].

use crate::audio::{AudioNormalizer, JobFiles};
use crate::engine::EngineSelector;
use crate::error::{ErrorCode, ErrorInfo, FailureStage, StageFailure};
use crate::fetcher::AudioFetcher;
use crate::metrics::TranscriptionMetrics;
use crate::schema::{Job, TranscriptionResult, decode_payload};
use async_trait::async_trait;
use job_worker::{
    BrokerProducer, Disposition, Headers, IdempotencyCache, Processor, RetryPolicy, WorkItem,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Processor settings
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub results_topic: String,
    /// Directory for per-job scratch files
    pub tmp_dir: PathBuf,
    pub download_timeout: Duration,
    pub max_audio_bytes: u64,
    pub max_audio_duration_secs: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            results_topic: "stt.results".to_string(),
            tmp_dir: std::env::temp_dir().join("stt"),
            download_timeout: Duration::from_secs(30),
            max_audio_bytes: 25 * 1024 * 1024,
            max_audio_duration_secs: 600.0,
        }
    }
}

pub struct JobProcessor {
    producer: Arc<dyn BrokerProducer>,
    fetcher: Arc<dyn AudioFetcher>,
    normalizer: Arc<dyn AudioNormalizer>,
    selector: Arc<EngineSelector>,
    retry: RetryPolicy,
    completed: IdempotencyCache,
    config: ProcessorConfig,
    metrics: TranscriptionMetrics,
}

impl JobProcessor {
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        fetcher: Arc<dyn AudioFetcher>,
        normalizer: Arc<dyn AudioNormalizer>,
        selector: Arc<EngineSelector>,
        retry: RetryPolicy,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            producer,
            fetcher,
            normalizer,
            selector,
            retry,
            completed: IdempotencyCache::default(),
            config,
            metrics: TranscriptionMetrics,
        }
    }

    pub fn with_cache(mut self, cache: IdempotencyCache) -> Self {
        self.completed = cache;
        self
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.completed
    }

    async fn run(&self, job: &Job) -> Result<(), StageFailure> {
        let started = Instant::now();
        let language = self.selector.resolve_language(job.language_hint.as_deref());
        let files = JobFiles::create(&self.config.tmp_dir, &job.job_id)
            .await
            .map_err(|e| e.at(FailureStage::Download))?;

        let download_started = Instant::now();
        self.fetcher
            .fetch(
                &job.audio_url,
                files.input(),
                self.config.download_timeout,
                self.config.max_audio_bytes,
            )
            .await
            .map_err(|e| e.at(FailureStage::Download))?;
        self.metrics.download_time(download_started.elapsed());

        let audio = self
            .normalizer
            .normalize(files.input(), files.wav())
            .await
            .map_err(|e| e.at(FailureStage::Download))?;
        if audio.duration_secs > self.config.max_audio_duration_secs {
            return Err(ErrorInfo::new(
                ErrorCode::AudioTooLong,
                format!(
                    "Audio longer than {}s",
                    self.config.max_audio_duration_secs
                ),
            )
            .at(FailureStage::Download));
        }

        let transcribe_started = Instant::now();
        let transcription = self
            .selector
            .transcribe(&audio, &language)
            .await
            .map_err(|e| e.at(FailureStage::Transcribe))?;
        self.metrics.transcribe_time(transcribe_started.elapsed());

        let result = TranscriptionResult::completed(
            job,
            &transcription.transcript,
            transcription.engine.as_ref(),
            &transcription.model_version,
        );
        self.publish(job, &result)
            .await
            .map_err(|e| e.at(FailureStage::Publish))?;
        self.completed.insert(job.job_id.clone());

        let elapsed = started.elapsed();
        self.metrics.job_completed();
        self.metrics.processing_time(elapsed);
        info!(
            job_id = %job.job_id,
            engine = %transcription.engine,
            lang = %language,
            audio_duration = audio.duration_secs,
            processing_ms = elapsed.as_millis() as u64,
            fallback_used = transcription.fallback_used,
            "Job completed"
        );
        Ok(())
    }

    async fn publish(&self, job: &Job, result: &TranscriptionResult) -> Result<(), ErrorInfo> {
        let value = serde_json::to_vec(result)
            .map_err(|e| ErrorInfo::new(ErrorCode::InternalError, e.to_string()))?;
        self.producer
            .send(
                &self.config.results_topic,
                Some(&job.job_id),
                &value,
                &Headers::new(),
            )
            .await?;
        self.producer.flush(self.retry.flush_timeout()).await?;
        Ok(())
    }

    async fn fail(
        &self,
        item: &WorkItem,
        raw: Option<Value>,
        job: Option<&Job>,
        failure: StageFailure,
    ) -> Disposition {
        let StageFailure { stage, error } = failure;
        warn!(
            job_id = ?job.map(|j| j.job_id.as_str()),
            stage = %stage,
            error_code = %error.code(),
            error_message = %error.message(),
            attempt = item.attempt,
            "Job stage failed"
        );
        self.metrics.failure(error.code());

        let disposition = self
            .retry
            .handle(self.producer.as_ref(), item, stage.as_ref(), &error, raw)
            .await;
        if disposition != Disposition::DeadLettered {
            return disposition;
        }

        self.metrics.job_failed();
        if let Some(job) = job {
            let result = TranscriptionResult::failed(
                job,
                &error,
                self.selector.primary_kind().as_ref(),
                &self.selector.model_version(),
            );
            if let Err(e) = self.publish(job, &result).await {
                error!(job_id = %job.job_id, error = %e, "Failed to publish FAILED result");
                return Disposition::Unresolved;
            }
        }
        disposition
    }
}

#[async_trait]
impl Processor for JobProcessor {
    async fn process(&self, item: &WorkItem) -> Disposition {
        let raw = match decode_payload(item.payload()) {
            Ok(raw) => raw,
            Err(e) => return self.fail(item, None, None, e.at(FailureStage::Validation)).await,
        };
        let job = match Job::from_value(raw.clone()) {
            Ok(job) => job,
            Err(e) => {
                return self
                    .fail(item, Some(raw), None, e.at(FailureStage::Validation))
                    .await;
            }
        };

        if self.completed.contains(&job.job_id) {
            info!(job_id = %job.job_id, stage = "dedupe", "Job already processed");
            self.metrics.job_duplicate();
            return Disposition::Duplicate;
        }

        match self.run(&job).await {
            Ok(()) => Disposition::Completed,
            Err(failure) => self.fail(item, Some(raw), Some(&job), failure).await,
        }
    }

    fn name(&self) -> &'static str {
        "JobProcessor"
    }
}
