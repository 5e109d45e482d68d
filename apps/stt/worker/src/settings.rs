//! Worker settings, read once from the environment at startup.

use core_config::{ConfigError, Environment, FromEnv, env_bool, env_or_default, env_parse};
use core_config::redis::RedisConfig;
use domain_transcription::EngineKind;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest delay the download retry loop may use.
const MIN_DOWNLOAD_BACKOFF_SECS: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub log_level: String,

    pub redis: RedisConfig,
    pub consumer_group: String,
    /// Stable consumer name; a random one is generated when unset
    pub consumer_name: Option<String>,
    /// Idle time after which another consumer's pending entry is claimed
    pub claim_idle: Duration,
    pub jobs_topic: String,
    pub results_topic: String,
    pub dlq_topic: String,

    pub concurrency: usize,
    pub queue_capacity: usize,

    pub max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,

    pub download_timeout: Duration,
    pub download_retries: u32,
    pub download_backoff: Duration,
    pub transcribe_timeout: Duration,
    pub max_audio_bytes: u64,
    pub max_audio_duration_secs: f64,

    pub engine: EngineKind,
    pub enable_fallback: bool,
    pub default_language: String,
    pub conformer_url: String,
    pub asr_model_id: String,
    pub asr_decoding: String,
    pub whisper_url: String,
    pub model_size: String,

    pub health_port: u16,
    pub metrics_port: u16,
    pub tmp_dir: PathBuf,
    pub ffmpeg_bin: PathBuf,

    pub dedup_ttl: Duration,
    pub dedup_capacity: u64,
}

impl FromEnv for Settings {
    fn from_env() -> Result<Self, ConfigError> {
        let consumer_group = std::env::var("KAFKA_GROUP_ID")
            .or_else(|_| std::env::var("CONSUMER_GROUP"))
            .unwrap_or_else(|_| "stt-worker".to_string());

        let download_backoff_secs: f64 = env_parse("AUDIO_DOWNLOAD_BACKOFF_SEC", 0.5)?;

        Ok(Self {
            environment: Environment::from_env(),
            log_level: env_or_default("LOG_LEVEL", "INFO"),

            redis: RedisConfig::from_env()?,
            consumer_group,
            consumer_name: std::env::var("CONSUMER_NAME")
                .ok()
                .filter(|name| !name.trim().is_empty()),
            claim_idle: Duration::from_secs(env_parse::<u64>("CLAIM_IDLE_SECS", 300)?.max(1)),
            jobs_topic: env_or_default("STT_JOBS_TOPIC", "stt.jobs"),
            results_topic: env_or_default("STT_RESULTS_TOPIC", "stt.results"),
            dlq_topic: env_or_default("STT_DLQ_TOPIC", "stt.jobs.dlq"),

            concurrency: env_parse("WORKER_CONCURRENCY", 1usize)?.max(1),
            queue_capacity: env_parse("WORKER_QUEUE_MAX", 4usize)?.max(1),

            max_attempts: env_parse("MAX_ATTEMPTS", 3)?,
            retry_backoff_base_ms: env_parse("RETRY_BACKOFF_BASE_MS", 500)?,
            retry_backoff_max_ms: env_parse("RETRY_BACKOFF_MAX_MS", 5000)?,

            download_timeout: Duration::from_secs(env_parse("AUDIO_DOWNLOAD_TIMEOUT", 30)?),
            download_retries: env_parse("AUDIO_DOWNLOAD_RETRIES", 2)?,
            download_backoff: seconds(
                "AUDIO_DOWNLOAD_BACKOFF_SEC",
                download_backoff_secs.max(MIN_DOWNLOAD_BACKOFF_SECS),
            )?,
            transcribe_timeout: Duration::from_secs(env_parse("TRANSCRIBE_TIMEOUT", 120)?),
            max_audio_bytes: env_parse("MAX_AUDIO_BYTES", 26_214_400)?,
            max_audio_duration_secs: env_parse("MAX_AUDIO_DURATION_SEC", 600.0)?,

            engine: EngineKind::from_config(&env_or_default("STT_ENGINE", "indic-conformer")),
            enable_fallback: env_bool("STT_ENABLE_FALLBACK", true),
            default_language: env_or_default("STT_DEFAULT_LANG", "mr"),
            conformer_url: env_or_default("CONFORMER_URL", "http://127.0.0.1:9000"),
            asr_model_id: env_or_default(
                "ASR_MODEL_ID",
                "ai4bharat/indic-conformer-600m-multilingual",
            ),
            asr_decoding: env_or_default("ASR_DECODING", "rnnt"),
            whisper_url: env_or_default("WHISPER_URL", "http://127.0.0.1:9001"),
            model_size: env_or_default("MODEL_SIZE", "small"),

            health_port: env_parse("HEALTH_PORT", 8081)?,
            metrics_port: env_parse("METRICS_PORT", 9108)?,
            tmp_dir: PathBuf::from(env_or_default("TMP_DIR", "/tmp/stt")),
            ffmpeg_bin: PathBuf::from(env_or_default("FFMPEG_BIN", "ffmpeg")),

            dedup_ttl: Duration::from_secs(env_parse("DEDUP_TTL_SECS", 3600)?),
            dedup_capacity: env_parse("DEDUP_CAPACITY", 10_000)?,
        })
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::ParseError {
        key: key.to_string(),
        details: e.to_string(),
    })
}
