//! Transcription metrics.
//!
//! Recorded through the `metrics` facade; the exporter is installed by the
//! worker binary via `job_worker::init_metrics`.

use crate::error::ErrorCode;
use metrics::{counter, histogram};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptionMetrics;

impl TranscriptionMetrics {
    pub fn job_completed(&self) {
        counter!("stt_jobs_total", "status" => "completed").increment(1);
    }

    pub fn job_failed(&self) {
        counter!("stt_jobs_total", "status" => "failed").increment(1);
    }

    pub fn job_duplicate(&self) {
        counter!("stt_jobs_total", "status" => "duplicate").increment(1);
    }

    pub fn failure(&self, code: ErrorCode) {
        counter!("stt_failures_total", "code" => code.as_ref().to_string()).increment(1);
    }

    pub fn download_time(&self, elapsed: Duration) {
        histogram!("stt_download_seconds").record(elapsed.as_secs_f64());
    }

    pub fn transcribe_time(&self, elapsed: Duration) {
        histogram!("stt_transcribe_seconds").record(elapsed.as_secs_f64());
    }

    pub fn processing_time(&self, elapsed: Duration) {
        histogram!("stt_processing_seconds").record(elapsed.as_secs_f64());
    }
}
