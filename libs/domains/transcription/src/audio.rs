//! Audio normalization and per-job scratch files.
//!
//! Downloaded audio is converted to 16 kHz mono WAV with `ffmpeg`; the
//! duration is then read from the WAV header.

use crate::error::{ErrorCode, ErrorInfo};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Converted audio ready for an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    pub path: PathBuf,
    pub duration_secs: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    /// Convert `input` into a 16 kHz mono WAV at `output`.
    async fn normalize(&self, input: &Path, output: &Path) -> Result<NormalizedAudio, ErrorInfo>;
}

/// `ffmpeg` subprocess normalizer.
#[derive(Debug, Clone)]
pub struct FfmpegNormalizer {
    binary: PathBuf,
}

impl FfmpegNormalizer {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for FfmpegNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<NormalizedAudio, ErrorInfo> {
        let status = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ac", "1", "-ar", "16000", "-vn", "-sn"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                ErrorInfo::new(
                    ErrorCode::InternalError,
                    format!("failed to run {}: {e}", self.binary.display()),
                )
            })?;

        if !status.success() {
            return Err(ErrorInfo::new(
                ErrorCode::UnsupportedFormat,
                "ffmpeg conversion failed",
            ));
        }

        let duration_secs = wav_duration(output).await?;
        debug!(path = %output.display(), duration_secs, "Audio normalized");
        Ok(NormalizedAudio {
            path: output.to_path_buf(),
            duration_secs,
        })
    }
}

/// Duration in seconds from a WAV header.
pub async fn wav_duration(path: &Path) -> Result<f64, ErrorInfo> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let reader = hound::WavReader::open(&path).map_err(|e| {
            ErrorInfo::new(ErrorCode::UnsupportedFormat, format!("unreadable WAV: {e}"))
        })?;
        let rate = reader.spec().sample_rate;
        if rate == 0 {
            return Ok(0.0);
        }
        Ok(f64::from(reader.duration()) / f64::from(rate))
    })
    .await?
}

/// Scratch files for one job, removed on drop.
#[derive(Debug)]
pub struct JobFiles {
    input: PathBuf,
    wav: PathBuf,
}

impl JobFiles {
    pub async fn create(dir: &Path, job_id: &str) -> Result<Self, ErrorInfo> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = format!("{}-{}", file_stem(job_id), Uuid::new_v4().simple());
        Ok(Self {
            input: dir.join(format!("{stem}.input")),
            wav: dir.join(format!("{stem}.wav")),
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn wav(&self) -> &Path {
        &self.wav
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        for path in [&self.input, &self.wav] {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                debug!(path = %path.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

/// Job ids come from the wire; keep only filesystem-safe characters.
fn file_stem(job_id: &str) -> String {
    let stem: String = job_id
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "job".to_string() } else { stem }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, samples: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two-seconds.wav");
        write_wav(&path, 16_000, 32_000);

        let duration = wav_duration(&path).await.unwrap();
        assert!((duration - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_wav_duration_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not a wav file").unwrap();

        let err = wav_duration(&path).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
    }

    #[tokio::test]
    async fn test_job_files_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let files = JobFiles::create(&dir.path().join("nested"), "j1").await.unwrap();
        std::fs::write(files.input(), b"audio").unwrap();
        std::fs::write(files.wav(), b"wav").unwrap();
        let (input, wav) = (files.input().to_path_buf(), files.wav().to_path_buf());

        drop(files);
        assert!(!input.exists());
        assert!(!wav.exists());
    }

    #[tokio::test]
    async fn test_job_files_are_unique_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let a = JobFiles::create(dir.path(), "../../etc/passwd").await.unwrap();
        let b = JobFiles::create(dir.path(), "../../etc/passwd").await.unwrap();

        assert_ne!(a.input(), b.input());
        assert_eq!(a.input().parent(), Some(dir.path()));
        let name = a.input().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("______etc_passwd-"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let normalizer = FfmpegNormalizer::new().with_binary("/nonexistent/ffmpeg");

        let err = normalizer
            .normalize(&dir.path().join("in"), &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_failed_conversion_is_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let normalizer = FfmpegNormalizer::new().with_binary("false");

        let err = normalizer
            .normalize(&dir.path().join("in"), &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
        assert!(!err.retryable());
    }
}
