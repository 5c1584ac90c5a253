use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::settings::Settings;

use super::download::{DownloadOutcome, ResumableDownloader};
use super::entry::CacheEntry;
use super::handler::{CacheStatus, RequestContext, RequestHandler, Response};
use super::locks::PathLocks;
use super::origin::OriginConfig;
use super::probe::ExistenceProbe;
use super::resolver::{PathResolver, ResolvedTarget};

/// Why a request ended in a 404. The display form is the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotFoundUpstream,
    DownloadExhausted { attempts: u32 },
    CachedUnreadable,
}

impl FailureReason {
    pub fn outcome(self) -> &'static str {
        match self {
            FailureReason::NotFoundUpstream => "NOT_FOUND",
            FailureReason::DownloadExhausted { .. } => "DOWNLOAD_FAILED",
            FailureReason::CachedUnreadable => "UNREADABLE",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFoundUpstream => {
                f.write_str("artifact not found in remote repository")
            }
            FailureReason::DownloadExhausted { attempts } => {
                write!(f, "artifact download failed after {attempts} attempts")
            }
            FailureReason::CachedUnreadable => f.write_str("cached artifact could not be read"),
        }
    }
}

/// Where the state machine ended up before anything is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    ServeLocal { cache: CacheStatus, attempts: u32 },
    Fail {
        cache: CacheStatus,
        reason: FailureReason,
        attempts: u32,
    },
}

/// Serves artifacts from the cache directory, fetching them from the origin on a miss.
#[derive(Debug)]
pub struct CacheGateway {
    resolver: PathResolver,
    probe: ExistenceProbe,
    downloader: ResumableDownloader,
    locks: Option<PathLocks>,
    verify_local_size: bool,
}

impl CacheGateway {
    pub fn new(
        resolver: PathResolver,
        probe: ExistenceProbe,
        downloader: ResumableDownloader,
    ) -> Self {
        Self {
            resolver,
            probe,
            downloader,
            locks: None,
            verify_local_size: false,
        }
    }

    /// Serialize requests that resolve to the same cache file.
    pub fn with_path_locks(mut self) -> Self {
        self.locks = Some(PathLocks::new());
        self
    }

    /// Compare the size of a cached file with the origin before serving it.
    pub fn with_local_size_verification(mut self, enabled: bool) -> Self {
        self.verify_local_size = enabled;
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let origin = Arc::new(OriginConfig::from_settings(settings));
        let resolver = PathResolver::new(
            settings.cache_dir.clone(),
            settings.virtual_prefix.clone(),
            origin.clone(),
        );
        let probe = ExistenceProbe::new(origin.build_existence_client()?, origin.clone());
        let downloader =
            ResumableDownloader::new(origin.build_client()?, settings.max_download_attempts);
        let gateway = Self::new(resolver, probe, downloader)
            .with_local_size_verification(settings.verify_local_size);
        Ok(if settings.lock_cache_paths {
            gateway.with_path_locks()
        } else {
            gateway
        })
    }

    pub async fn serve(&self, raw_path: &str) -> Response {
        let target = self.resolver.resolve(raw_path);
        let entry = CacheEntry::from_target(&target);
        let guard = match &self.locks {
            Some(locks) => Some(locks.acquire(entry.path()).await),
            None => None,
        };

        let response = match self.resolve_entry(&target, &entry).await {
            Resolution::ServeLocal { cache, attempts } => {
                self.serve_local(&entry, cache, attempts).await
            }
            Resolution::Fail {
                cache,
                reason,
                attempts,
            } => Response::not_found(reason, reason.outcome())
                .with_cache(cache)
                .with_attempts(attempts),
        };
        response.with_guard(guard)
    }

    async fn resolve_entry(&self, target: &ResolvedTarget, entry: &CacheEntry) -> Resolution {
        if entry.is_present().await {
            if !self.verify_local_size {
                debug!(path = entry.relative_path(), "serving cached artifact");
                return Resolution::ServeLocal {
                    cache: CacheStatus::Hit,
                    attempts: 0,
                };
            }
            let local = entry.size_on_disk().await;
            match self.probe.content_length(&target.remote_url).await {
                Some(remote) if remote > local => {
                    debug!(
                        path = entry.relative_path(),
                        local, remote, "cached artifact is incomplete; resuming"
                    );
                    return self.download(target, entry, CacheStatus::Partial).await;
                }
                _ => {
                    return Resolution::ServeLocal {
                        cache: CacheStatus::Hit,
                        attempts: 0,
                    };
                }
            }
        }

        if target.relative_path.is_empty() {
            return Resolution::Fail {
                cache: CacheStatus::Miss,
                reason: FailureReason::NotFoundUpstream,
                attempts: 0,
            };
        }

        if !self.probe.exists(&target.remote_url).await {
            debug!(url = %target.remote_url, "artifact missing upstream");
            return Resolution::Fail {
                cache: CacheStatus::Miss,
                reason: FailureReason::NotFoundUpstream,
                attempts: 0,
            };
        }

        self.download(target, entry, CacheStatus::Miss).await
    }

    async fn download(
        &self,
        target: &ResolvedTarget,
        entry: &CacheEntry,
        cache: CacheStatus,
    ) -> Resolution {
        match self.downloader.download(&target.remote_url, entry).await {
            DownloadOutcome::Complete {
                attempts,
                advertised_total,
            } => {
                let on_disk = entry.size_on_disk().await;
                if on_disk != advertised_total {
                    // Concurrent unlocked downloads of the same path append twice.
                    warn!(
                        path = %entry.path().display(),
                        on_disk,
                        advertised_total,
                        "cached artifact size differs from origin"
                    );
                }
                Resolution::ServeLocal { cache, attempts }
            }
            DownloadOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    url = %target.remote_url,
                    attempts,
                    error = %last_error,
                    "giving up on artifact download"
                );
                Resolution::Fail {
                    cache,
                    reason: FailureReason::DownloadExhausted { attempts },
                    attempts,
                }
            }
        }
    }

    async fn serve_local(&self, entry: &CacheEntry, cache: CacheStatus, attempts: u32) -> Response {
        let outcome = match cache {
            CacheStatus::Hit => "HIT",
            CacheStatus::Partial | CacheStatus::Miss => "DOWNLOADED",
        };
        match entry.open_read().await {
            Ok((file, len)) => Response::artifact(file, len, outcome)
                .with_cache(cache)
                .with_attempts(attempts),
            Err(err) => {
                warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "cached artifact could not be opened"
                );
                let reason = FailureReason::CachedUnreadable;
                Response::not_found(reason, reason.outcome())
                    .with_cache(cache)
                    .with_attempts(attempts)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for CacheGateway {
    async fn handle(&self, request: &RequestContext) -> Response {
        self.serve(&request.path).await
    }
}
