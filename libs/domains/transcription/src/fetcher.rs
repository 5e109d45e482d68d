//! Audio download.
//!
//! [`HttpAudioFetcher`] streams the body to disk, enforcing the size ceiling
//! both on the declared `Content-Length` and on the bytes actually received.
//! Transient failures (transport errors, 429, 5xx) are retried a bounded
//! number of times before being surfaced.

use crate::error::{ErrorCode, ErrorInfo};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A downloaded audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Download `url` into `destination`.
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<FetchedAudio, ErrorInfo>;
}

#[derive(Debug, Clone)]
pub struct HttpAudioFetcher {
    client: Client,
    retries: u32,
    backoff_base: Duration,
}

impl HttpAudioFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }

    /// Extra attempts after the first one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Delay before retry `n` is `backoff_base * 2^n`.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    async fn fetch_once(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<FetchedAudio, ErrorInfo> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(
                ErrorInfo::new(ErrorCode::DownloadFailed, format!("HTTP {}", status.as_u16()))
                    .with_retryable(retryable),
            );
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(declared) = response.content_length()
            && declared > max_bytes
        {
            return Err(too_large(max_bytes));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut size: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            size += chunk.len() as u64;
            if size > max_bytes {
                return Err(too_large(max_bytes));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if size == 0 {
            return Err(
                ErrorInfo::new(ErrorCode::DownloadFailed, "Empty audio").with_retryable(false)
            );
        }

        Ok(FetchedAudio {
            path: destination.to_path_buf(),
            size_bytes: size,
            content_type,
        })
    }
}

impl Default for HttpAudioFetcher {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<FetchedAudio, ErrorInfo> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url, destination, timeout, max_bytes).await {
                Ok(fetched) => {
                    debug!(
                        size_bytes = fetched.size_bytes,
                        content_type = ?fetched.content_type,
                        "Audio downloaded"
                    );
                    return Ok(fetched);
                }
                Err(e) if !e.retryable() || attempt >= self.retries => return Err(e),
                Err(e) => {
                    let delay = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        error_code = %e.code(),
                        error = %e.message(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Audio download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> ErrorInfo {
    if err.is_timeout() {
        ErrorInfo::new(ErrorCode::DownloadTimeout, err.to_string())
    } else {
        ErrorInfo::new(ErrorCode::DownloadFailed, err.to_string())
    }
}

fn too_large(max_bytes: u64) -> ErrorInfo {
    ErrorInfo::new(
        ErrorCode::AudioTooLarge,
        format!("Audio exceeds {max_bytes} bytes"),
    )
}
