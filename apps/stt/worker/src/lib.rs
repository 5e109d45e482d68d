//! Speech-to-Text Worker Service
//!
//! Pulls transcription jobs from a Redis stream, runs them through the
//! configured engine and publishes results or dead-letter records.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (stt.jobs)
//!   ↓ (Consumer Group: stt-worker)
//! Coordinator → intake queue → WorkerPool
//!   ↓
//! JobProcessor (fetch → ffmpeg → EngineSelector)
//!   ↓
//! Redis Stream (stt.results)  /  retry → stt.jobs  /  DLQ → stt.jobs.dlq
//! ```
//!
//! ## Startup
//!
//! Health and metrics servers come up first so health checks can watch the
//! engines load: `/health` answers 503 until the selector is initialized and
//! stays 503 if initialization fails, in which case the process exits.

pub mod settings;

pub use settings::Settings;

use axum::Router;
use core_config::FromEnv;
use domain_transcription::{
    ConformerConfig, EngineSelector, FfmpegNormalizer, HttpAudioFetcher, HttpEngineFactory,
    JobProcessor, ProcessorConfig, SelectorOptions, WhisperConfig,
};
use eyre::{Result, WrapErr};
use job_worker::redis_streams::{RedisStreamConsumer, RedisStreamProducer, connect_with_retry};
use job_worker::{
    Backoff, BrokerProducer, Coordinator, HealthState, IdempotencyCache, ReadinessState,
    RetryPolicy, WorkerConfig, health_router, metrics_router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const REDIS_CONNECT_ATTEMPTS: u32 = 5;

/// Bind `0.0.0.0:port`.
async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))
}

/// Serve `app` on `listener` in the background.
fn spawn_server(name: &'static str, listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!(server = name, addr = %addr, "HTTP server listening");
        }
        if let Err(e) = axum::serve(listener, app).await {
            error!(server = name, error = %e, "HTTP server failed");
        }
    });
}

/// Run the worker until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if settings are invalid, a port cannot be bound, no
/// transcription engine can be initialized, Redis is unreachable or the
/// consumption loop fails.
pub async fn run() -> Result<()> {
    let settings = Settings::from_env().wrap_err("Failed to load worker settings")?;

    core_config::tracing::init_tracing(&settings.environment, &settings.log_level);
    job_worker::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "Starting speech-to-text worker"
    );

    let readiness = ReadinessState::new();
    readiness.begin_initializing(settings.engine.to_string());

    let health_listener = bind(settings.health_port).await?;
    spawn_server(
        "health",
        health_listener,
        health_router(HealthState::new(readiness.clone())),
    );
    if settings.metrics_port != settings.health_port {
        let metrics_listener = bind(settings.metrics_port).await?;
        spawn_server("metrics", metrics_listener, metrics_router());
    }

    let http = reqwest::Client::builder()
        .build()
        .wrap_err("Failed to build HTTP client")?;

    let selector = initialize_engines(&settings, http.clone(), &readiness).await?;

    info!(url = %settings.redis.url, "Connecting to Redis...");
    let redis = connect_with_retry(
        &settings.redis.url,
        REDIS_CONNECT_ATTEMPTS,
        &Backoff::from_millis(500, 5_000),
    )
    .await
    .wrap_err("Failed to connect to Redis")?;

    let mut consumer = RedisStreamConsumer::new(redis.clone(), settings.consumer_group.clone())
        .with_claim_idle(settings.claim_idle);
    if let Some(name) = &settings.consumer_name {
        consumer = consumer.with_consumer_id(name.clone());
    }
    let producer: Arc<dyn BrokerProducer> = Arc::new(RedisStreamProducer::new(redis));

    tokio::fs::create_dir_all(&settings.tmp_dir)
        .await
        .wrap_err_with(|| format!("Failed to create {}", settings.tmp_dir.display()))?;

    let fetcher = HttpAudioFetcher::new(http)
        .with_retries(settings.download_retries)
        .with_backoff_base(settings.download_backoff);
    let normalizer = FfmpegNormalizer::new().with_binary(settings.ffmpeg_bin.clone());
    let retry = RetryPolicy::new(settings.jobs_topic.clone(), settings.dlq_topic.clone())
        .with_max_attempts(settings.max_attempts)
        .with_backoff(Backoff::from_millis(
            settings.retry_backoff_base_ms,
            settings.retry_backoff_max_ms,
        ));
    let processor = JobProcessor::new(
        producer,
        Arc::new(fetcher),
        Arc::new(normalizer),
        Arc::new(selector),
        retry,
        ProcessorConfig {
            results_topic: settings.results_topic.clone(),
            tmp_dir: settings.tmp_dir.clone(),
            download_timeout: settings.download_timeout,
            max_audio_bytes: settings.max_audio_bytes,
            max_audio_duration_secs: settings.max_audio_duration_secs,
        },
    )
    .with_cache(IdempotencyCache::new(
        settings.dedup_ttl,
        settings.dedup_capacity,
    ));

    let worker_config = WorkerConfig::new(settings.jobs_topic.clone())
        .with_concurrency(settings.concurrency)
        .with_queue_capacity(settings.queue_capacity);
    info!(
        stream = %worker_config.topic,
        consumer_group = %settings.consumer_group,
        consumer_id = %consumer.consumer_id(),
        concurrency = worker_config.concurrency,
        queue_capacity = worker_config.queue_capacity,
        "Worker configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    Coordinator::new(consumer, worker_config)
        .run(Arc::new(processor), shutdown_rx)
        .await
        .wrap_err("Consumption loop failed")?;

    info!("Speech-to-text worker stopped");
    Ok(())
}

/// Build the engine selector and record the outcome in `readiness`.
async fn initialize_engines(
    settings: &Settings,
    http: reqwest::Client,
    readiness: &ReadinessState,
) -> Result<EngineSelector> {
    let factory = HttpEngineFactory::new(
        http,
        ConformerConfig::new(settings.conformer_url.clone())
            .with_model_id(settings.asr_model_id.clone())
            .with_decoding(settings.asr_decoding.clone()),
        WhisperConfig::new(settings.whisper_url.clone()).with_model_size(settings.model_size.clone()),
    );
    let options = SelectorOptions {
        fallback_enabled: settings.enable_fallback,
        default_language: settings.default_language.clone(),
        timeout: settings.transcribe_timeout,
    };

    match EngineSelector::initialize(&factory, settings.engine, options).await {
        Ok(selector) => {
            readiness.mark_ready(selector.primary_kind().to_string());
            info!(
                engine = %selector.primary_kind(),
                model_version = %selector.model_version(),
                fallback = selector.has_fallback(),
                "Transcription engine ready"
            );
            Ok(selector)
        }
        Err(e) => {
            readiness.mark_failed();
            error!(error_code = %e.code(), error = %e.message(), "Engine initialization failed");
            Err(e).wrap_err("No transcription engine could be initialized")
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
