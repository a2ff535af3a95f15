//! Artifact download executor with retry, resume, and verification
//!
//! Streams a remote artifact into a local file through an optional proxy,
//! pacing writes with the rate limiter, retrying transient failures with
//! exponential backoff, and handing the finished file to the verifier
//! before returning its path.

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn, Instrument};

use crate::downloader::config::{calculate_backoff, DEFAULT_CHUNK_SIZE};
use crate::downloader::options::DownloadOptions;
use crate::downloader::progress::{format_rate, ProgressState};
use crate::downloader::rate_limit::RateLimiter;
use crate::downloader::DownloadError;
use crate::verify::{Sha256Verifier, Verifier};
use crate::ArtifactConfig;

/// Downloads remote artifacts into verified local files
pub struct ArtifactDownloader {
    verifier: Arc<dyn Verifier>,
}

impl ArtifactDownloader {
    /// Create a downloader with the built-in SHA-256 verifier
    pub fn new() -> Self {
        Self {
            verifier: Arc::new(Sha256Verifier::new()),
        }
    }

    /// Replace the integrity verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Download `config.url` into `{dest_dir}/{name}-{version}.{format}`.
    ///
    /// The whole operation, retries included, is bounded by
    /// `options.timeout`. On success the finished file has passed the
    /// verifier; on failure a typed [`DownloadError`] explains why. A
    /// partial `.part` file survives timeouts and failed attempts only when
    /// `options.resume_download` is set.
    pub async fn download(
        &self,
        config: &ArtifactConfig,
        dest_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<PathBuf, DownloadError> {
        config.validate().map_err(DownloadError::InvalidConfig)?;

        let span = tracing::info_span!(
            "download_artifact",
            name = %config.name,
            version = %config.version,
            url = %config.url
        );

        // Instrument instead of entering the span so the returned future
        // stays Send and callers can tokio::spawn it.
        self.download_inner(config, dest_dir, options)
            .instrument(span)
            .await
    }

    async fn download_inner(
        &self,
        config: &ArtifactConfig,
        dest_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<PathBuf, DownloadError> {
        info!("Starting artifact download");

        let client = build_client(options)?;

        let mut limiter = options.rate_limit.clone().map(RateLimiter::new);
        if let Some(limiter) = &limiter {
            if let Some(max_bps) = limiter.max_bytes_per_second() {
                info!("Rate limiting enabled: {}", format_rate(max_bps as f64));
            }
        }

        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| DownloadError::Io(format!("Failed to create {}: {e}", dest_dir.display())))?;

        let final_path = dest_dir.join(config.file_name());
        let part_path = dest_dir.join(format!("{}.part", config.file_name()));

        let started = Instant::now();
        let transfer = self.download_with_retry(
            &client,
            config,
            options,
            &mut limiter,
            &part_path,
            &final_path,
        );

        match tokio::time::timeout(options.timeout, transfer).await {
            Ok(result) => result?,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if options.resume_download {
                    info!(
                        part = %part_path.display(),
                        "Download timed out; keeping partial file for resume"
                    );
                } else {
                    let _ = fs::remove_file(&part_path).await;
                }
                return Err(DownloadError::Timeout { elapsed_ms });
            }
        }

        let report = self.verifier.verify(&final_path, config).await;
        for warning in &report.warnings {
            warn!(warning = %warning, "Verifier warning");
        }
        if !report.valid {
            // Never leave a file that failed verification at the final path.
            let _ = fs::remove_file(&final_path).await;
            return Err(DownloadError::Integrity(report.errors));
        }

        info!(
            path = %final_path.display(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Artifact download completed"
        );

        Ok(final_path)
    }

    /// Retry transient failures with exponential backoff until the transfer
    /// completes or the retry budget is exhausted
    async fn download_with_retry(
        &self,
        client: &Client,
        config: &ArtifactConfig,
        options: &DownloadOptions,
        limiter: &mut Option<RateLimiter>,
        part_path: &Path,
        final_path: &Path,
    ) -> Result<(), DownloadError> {
        let mut attempt: u32 = 0;

        loop {
            match self
                .attempt_transfer(client, config, options, limiter, part_path)
                .await
            {
                Ok(()) => {
                    fs::rename(part_path, final_path).await.map_err(|e| {
                        DownloadError::Io(format!(
                            "Failed to move finished file into place: {e}"
                        ))
                    })?;
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt > options.max_retries {
                        return Err(DownloadError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }

                    let backoff = calculate_backoff(attempt - 1);
                    warn!(
                        attempt = attempt,
                        max_retries = options.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient download failure, retrying after backoff"
                    );

                    if !options.resume_download {
                        // Next attempt restarts from zero.
                        let _ = fs::remove_file(part_path).await;
                    }

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute one transfer attempt into the partial file
    async fn attempt_transfer(
        &self,
        client: &Client,
        config: &ArtifactConfig,
        options: &DownloadOptions,
        limiter: &mut Option<RateLimiter>,
        part_path: &Path,
    ) -> Result<(), DownloadError> {
        let resume_from = if options.resume_download {
            match fs::metadata(part_path).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        } else {
            0
        };

        let mut request = client.get(&config.url);
        if resume_from > 0 {
            debug!(resume_from, "Resuming partial download with byte-range request");
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        if status.is_client_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        // A 206 means the server honored the range; a plain 200 after a
        // range request means it did not, so the transfer restarts at zero.
        let resumed = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
        let already_have = if resumed { resume_from } else { 0 };

        let total_bytes = response
            .content_length()
            .map(|len| already_have + len)
            .or(Some(config.size));

        let mut file = if resumed {
            OpenOptions::new()
                .append(true)
                .open(part_path)
                .await
                .map_err(|e| DownloadError::Io(format!("Failed to open partial file: {e}")))?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(part_path)
                .await
                .map_err(|e| DownloadError::Io(format!("Failed to create partial file: {e}")))?
        };

        let chunk_size = limiter
            .as_ref()
            .map(|l| l.optimal_chunk_size())
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        let mut progress = ProgressState::new(total_bytes, already_have);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Network(e.to_string()))?;

            // Network chunks can be larger than the pacing chunk size;
            // throttle each written slice separately so pacing holds.
            for piece in chunk.chunks(chunk_size) {
                if let Some(limiter) = limiter.as_mut() {
                    limiter.throttle(piece.len() as u64).await;
                }

                file.write_all(piece)
                    .await
                    .map_err(|e| DownloadError::Io(format!("Failed to write chunk: {e}")))?;

                let snapshot = progress.update(piece.len() as u64);
                if let Some(on_progress) = &options.on_progress {
                    on_progress(&snapshot);
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::Io(format!("Failed to flush partial file: {e}")))?;

        debug!(
            bytes = progress.bytes_downloaded(),
            "Transfer attempt finished"
        );

        Ok(())
    }
}

impl Default for ArtifactDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the HTTP client, routing through a proxy when configured
fn build_client(options: &DownloadOptions) -> Result<Client, DownloadError> {
    let mut builder = Client::builder();

    if let Some(proxy_config) = &options.proxy {
        info!("Using proxy: {}", proxy_config.endpoint());

        let mut proxy = reqwest::Proxy::all(proxy_config.endpoint())
            .map_err(|e| DownloadError::InvalidConfig(format!("Invalid proxy: {e}")))?;
        if let Some(auth) = &proxy_config.auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DownloadError::Network(format!("Failed to build HTTP client: {e}")))
}
