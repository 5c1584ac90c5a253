use std::io;
use std::path::PathBuf;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::origin::{content_length, content_range_start};

/// Size of each append to the cache file while a response streams in.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024;

/// Attempts per logical download when nothing else is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Why a single download attempt failed. Every variant counts toward the retry bound.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: StatusCode },
    #[error("partial reply from {url} does not start at byte {expected}")]
    RangeMismatch {
        url: String,
        expected: u64,
        actual: Option<u64>,
    },
    #[error("stream from {url} failed after {received} bytes: {source}")]
    Stream {
        url: String,
        received: u64,
        #[source]
        source: reqwest::Error,
    },
    #[error("cache file {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stream from {url} ended after {received} of {expected} bytes")]
    Truncated {
        url: String,
        received: u64,
        expected: u64,
    },
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Complete {
        attempts: u32,
        /// Total size the origin advertised for the resource.
        advertised_total: u64,
    },
    /// The retry bound was reached. Whatever was appended stays on disk for a later resume.
    Exhausted {
        attempts: u32,
        last_error: DownloadError,
    },
}

impl DownloadOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DownloadOutcome::Complete { attempts, .. }
            | DownloadOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// State of one logical download: a sequence of attempts against the same URL and file.
#[derive(Debug)]
pub struct DownloadSession<'a> {
    url: &'a str,
    entry: &'a CacheEntry,
    attempts: u32,
    max_attempts: u32,
}

impl<'a> DownloadSession<'a> {
    fn new(url: &'a str, entry: &'a CacheEntry, max_attempts: u32) -> Self {
        Self {
            url,
            entry,
            attempts: 0,
            max_attempts,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// How the body of an accepted response maps onto the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferPlan {
    /// Leading body bytes already present locally.
    skip: u64,
    /// Bytes the body should add to the file.
    remaining: u64,
    advertised_total: u64,
}

/// Why a response cannot be appended to the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanRejection {
    Status,
    /// A 206 whose `Content-Range` does not start at the local size.
    RangeStart(Option<u64>),
}

impl TransferPlan {
    fn for_response(
        status: StatusCode,
        offset: u64,
        content_length: Option<u64>,
        range_start: Option<u64>,
    ) -> Result<Self, PlanRejection> {
        let length = content_length.unwrap_or(0);
        match status {
            StatusCode::PARTIAL_CONTENT if range_start != Some(offset) => {
                Err(PlanRejection::RangeStart(range_start))
            }
            StatusCode::PARTIAL_CONTENT => Ok(Self {
                skip: 0,
                remaining: length,
                advertised_total: length + offset,
            }),
            // A full body, possibly in answer to a range request the origin ignored.
            StatusCode::OK => Ok(Self {
                skip: offset,
                remaining: length.saturating_sub(offset),
                advertised_total: length,
            }),
            _ => Err(PlanRejection::Status),
        }
    }
}

pub(crate) fn range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Materializes a remote resource at a cache path, resuming from whatever is already on disk.
#[derive(Debug, Clone)]
pub struct ResumableDownloader {
    client: reqwest::Client,
    max_attempts: u32,
}

impl ResumableDownloader {
    pub fn new(client: reqwest::Client, max_attempts: u32) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn download(&self, url: &str, entry: &CacheEntry) -> DownloadOutcome {
        let mut session = DownloadSession::new(url, entry, self.max_attempts);
        loop {
            session.attempts += 1;
            match self.attempt(&session).await {
                Ok(plan) => {
                    crate::metrics::record_download_attempt(true);
                    info!(
                        url,
                        path = %entry.path().display(),
                        attempts = session.attempts,
                        size = plan.advertised_total,
                        "artifact downloaded"
                    );
                    return DownloadOutcome::Complete {
                        attempts: session.attempts,
                        advertised_total: plan.advertised_total,
                    };
                }
                Err(err) => {
                    crate::metrics::record_download_attempt(false);
                    warn!(
                        url,
                        attempt = session.attempts,
                        max_attempts = session.max_attempts,
                        error = %err,
                        "download attempt failed"
                    );
                    if session.exhausted() {
                        return DownloadOutcome::Exhausted {
                            attempts: session.attempts,
                            last_error: err,
                        };
                    }
                }
            }
        }
    }

    async fn attempt(&self, session: &DownloadSession<'_>) -> Result<TransferPlan, DownloadError> {
        let url = session.url;
        let entry = session.entry;
        let io_error = |source| DownloadError::Io {
            path: entry.path().to_path_buf(),
            source,
        };

        let offset = entry.size_on_disk().await;
        entry.ensure_parent().await.map_err(io_error)?;
        let mut file = entry.open_append().await.map_err(io_error)?;

        let mut request = self.client.get(url);
        if offset > 0 {
            debug!(url, offset, "resuming download");
            request = request.header(RANGE, range_header(offset));
        }
        let response = request
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let headers = response.headers();
        let plan = TransferPlan::for_response(
            status,
            offset,
            content_length(headers),
            content_range_start(headers),
        )
        .map_err(|rejection| match rejection {
            PlanRejection::Status => DownloadError::Status {
                url: url.to_string(),
                status,
            },
            PlanRejection::RangeStart(actual) => DownloadError::RangeMismatch {
                url: url.to_string(),
                expected: offset,
                actual,
            },
        })?;

        let mut stream = response.bytes_stream();
        let mut skip = plan.skip;
        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Stream {
                url: url.to_string(),
                received,
                source,
            })?;
            let mut data = &chunk[..];
            if skip > 0 {
                let skipped = skip.min(data.len() as u64) as usize;
                data = &data[skipped..];
                skip -= skipped as u64;
            }
            for piece in data.chunks(DOWNLOAD_CHUNK_SIZE) {
                file.write_all(piece).await.map_err(io_error)?;
                received += piece.len() as u64;
            }
            crate::metrics::record_download_bytes(data.len() as u64);
        }
        file.flush().await.map_err(io_error)?;

        if received < plan.remaining {
            return Err(DownloadError::Truncated {
                url: url.to_string(),
                received,
                expected: plan.remaining,
            });
        }
        Ok(plan)
    }
}
