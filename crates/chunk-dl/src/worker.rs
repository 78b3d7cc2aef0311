//! Download worker - sequential chunk loop with retries and progress tracking

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::client::{Chunk, ChunkClient};
use crate::error::{ChunkError, DownloadError};
use crate::types::{DownloadOptions, DownloadReport, ProgressCallback, SessionState};

/// Write buffer size (2 MB) - chunks are small, so batch the file writes
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Client-side state of one download
#[derive(Debug)]
pub struct DownloadSession {
    attach_id: String,
    destination: PathBuf,
    chunk_size: u64,
    max_retries: u32,
    bytes_written: u64,
    total_size: Option<u64>,
    retry_count: u32,
    total_retries: u32,
    chunks: u32,
    state: SessionState,
}

impl DownloadSession {
    pub fn new(attach_id: &str, destination: &Path, options: &DownloadOptions) -> Self {
        DownloadSession {
            attach_id: attach_id.to_string(),
            destination: destination.to_path_buf(),
            chunk_size: options.chunk_size,
            max_retries: options.max_retries,
            bytes_written: 0,
            total_size: None,
            retry_count: 0,
            total_retries: 0,
            chunks: 0,
            state: SessionState::Init,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn is_complete(&self) -> bool {
        self.total_size == Some(self.bytes_written)
    }

    /// Length to request for the next chunk. Before the size is known
    /// (offset 0) the full chunk size is requested.
    pub fn next_length(&self) -> u64 {
        match self.total_size {
            Some(total) => self.chunk_size.min(total.saturating_sub(self.bytes_written)),
            None => self.chunk_size,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "download_state: {} {} -> {} (offset={})",
            self.attach_id, self.state, next, self.bytes_written
        );
        self.state = next;
    }

    /// Check a chunk against the session before committing it
    fn verify(&self, requested: u64, chunk: &Chunk) -> Result<(), VerifyError> {
        if let Some(expected) = self.total_size {
            if chunk.total_size != expected {
                return Err(VerifyError::SizeChanged {
                    expected,
                    actual: chunk.total_size,
                });
            }
        }

        let remaining = chunk.total_size.saturating_sub(self.bytes_written);
        let expected_len = requested.min(remaining);
        if chunk.bytes.len() as u64 != expected_len {
            return Err(VerifyError::Chunk(ChunkError::Malformed(format!(
                "expected {} bytes at offset {}, got {}",
                expected_len,
                self.bytes_written,
                chunk.bytes.len()
            ))));
        }
        Ok(())
    }

    fn commit(&mut self, chunk: &Chunk) {
        self.total_size = Some(chunk.total_size);
        self.bytes_written += chunk.bytes.len() as u64;
        self.retry_count = 0;
        self.chunks += 1;
    }
}

enum VerifyError {
    SizeChanged { expected: u64, actual: u64 },
    Chunk(ChunkError),
}

/// Drives download sessions against one proxy
#[derive(Debug, Clone)]
pub struct ChunkDownloader {
    client: ChunkClient,
    options: DownloadOptions,
}

impl ChunkDownloader {
    pub fn new(client: ChunkClient, options: DownloadOptions) -> Self {
        ChunkDownloader { client, options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download `attach_id` into `destination`, overwriting it.
    ///
    /// A partial file is left behind on failure.
    pub async fn download(
        &self,
        attach_id: &str,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadReport, DownloadError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.download_with_cancel(attach_id, destination, &cancelled, progress)
            .await
    }

    /// Like [`download`](Self::download), checking `cancelled` between chunks
    pub async fn download_with_cancel(
        &self,
        attach_id: &str,
        destination: &Path,
        cancelled: &Arc<AtomicBool>,
        mut progress: Option<ProgressCallback>,
    ) -> Result<DownloadReport, DownloadError> {
        if self.options.chunk_size == 0 {
            return Err(DownloadError::InvalidOptions(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        info!(
            "download_start: {} -> {} (chunk_size={}, max_retries={})",
            attach_id,
            destination.display(),
            self.options.chunk_size,
            self.options.max_retries
        );
        let start_time = Instant::now();
        let mut session = DownloadSession::new(attach_id, destination, &self.options);

        // Create parent directories if needed
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::io(parent, e))?;
            }
        }

        let file = File::create(destination)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let result = self
            .run_session(&mut session, &mut writer, cancelled, &mut progress)
            .await;

        // Flush whatever was committed, also on failure
        let flushed = writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(destination, e));

        match result.and(flushed) {
            Ok(()) => {
                session.transition(SessionState::Complete);
                let report = DownloadReport {
                    attach_id: attach_id.to_string(),
                    destination: destination.to_path_buf(),
                    total_size: session.bytes_written,
                    chunks: session.chunks,
                    retries: session.total_retries,
                    elapsed: start_time.elapsed(),
                };
                info!(
                    "download_complete: {} ({} bytes, {} chunks, {} retries, {:?})",
                    attach_id, report.total_size, report.chunks, report.retries, report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                if session.state != SessionState::Failed {
                    session.transition(SessionState::Failed);
                }
                warn!(
                    "download_failed: {} after {} bytes: {}",
                    attach_id, session.bytes_written, e
                );
                Err(e)
            }
        }
    }

    async fn run_session(
        &self,
        session: &mut DownloadSession,
        writer: &mut BufWriter<File>,
        cancelled: &Arc<AtomicBool>,
        progress: &mut Option<ProgressCallback>,
    ) -> Result<(), DownloadError> {
        while !session.is_complete() {
            if cancelled.load(Ordering::SeqCst) {
                return Err(DownloadError::Cancelled {
                    bytes_written: session.bytes_written,
                });
            }

            let chunk = self.fetch_with_retry(session, cancelled).await?;

            writer
                .write_all(&chunk.bytes)
                .await
                .map_err(|e| DownloadError::io(&session.destination, e))?;
            session.commit(&chunk);

            // Zero-length attachments complete without a progress report
            if chunk.total_size > 0 {
                if let Some(callback) = progress.as_mut() {
                    callback(session.bytes_written, chunk.total_size);
                }
            }
        }
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        session: &mut DownloadSession,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<Chunk, DownloadError> {
        let offset = session.bytes_written;
        let length = session.next_length();

        loop {
            session.transition(SessionState::FetchingChunk);
            let attempt = self
                .client
                .fetch_chunk(&session.attach_id, offset, length, self.options.chunk_timeout)
                .await;

            let failure = match attempt {
                Ok(chunk) => match session.verify(length, &chunk) {
                    Ok(()) => {
                        session.transition(SessionState::ChunkOk);
                        return Ok(chunk);
                    }
                    Err(VerifyError::SizeChanged { expected, actual }) => {
                        session.transition(SessionState::Failed);
                        return Err(DownloadError::SizeChanged { expected, actual });
                    }
                    Err(VerifyError::Chunk(e)) => e,
                },
                Err(e) if !e.is_retryable() => {
                    session.transition(SessionState::Failed);
                    let attach_id = session.attach_id.clone();
                    return Err(match e {
                        ChunkError::InvalidRange(message) => DownloadError::InvalidRange {
                            attach_id,
                            offset,
                            message,
                        },
                        reason => DownloadError::Rejected {
                            attach_id,
                            offset,
                            reason,
                        },
                    });
                }
                Err(e) => e,
            };

            session.transition(SessionState::ChunkFail);
            session.retry_count += 1;

            if session.retry_count > session.max_retries {
                session.transition(SessionState::RetryExhausted);
                session.transition(SessionState::Failed);
                return Err(DownloadError::RetryExhausted {
                    offset,
                    attempts: session.retry_count,
                    last_error: failure,
                });
            }

            session.total_retries += 1;
            session.transition(SessionState::Retrying);
            let delay = self.options.backoff.delay(session.retry_count);
            warn!(
                "chunk_retry: {} offset={} attempt {}/{} in {:?}: {}",
                session.attach_id,
                offset,
                session.retry_count,
                session.max_retries,
                delay,
                failure
            );
            tokio::time::sleep(delay).await;

            if cancelled.load(Ordering::SeqCst) {
                return Err(DownloadError::Cancelled {
                    bytes_written: session.bytes_written,
                });
            }
        }
    }
}

/// Download with default HTTP client, reporting only success or failure
pub async fn download(
    proxy_base: &str,
    attach_id: &str,
    destination: &Path,
    options: DownloadOptions,
    progress: Option<ProgressCallback>,
) -> bool {
    let client = match ChunkClient::new(proxy_base) {
        Ok(c) => c,
        Err(e) => {
            warn!("download_failed: {}: {}", attach_id, e);
            return false;
        }
    };
    ChunkDownloader::new(client, options)
        .download(attach_id, destination, progress)
        .await
        .is_ok()
}
