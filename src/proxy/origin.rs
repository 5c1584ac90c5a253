use std::time::Duration;

use anyhow::{Context, Result};
use http::HeaderMap;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE};

use crate::settings::Settings;

const USER_AGENT: &str = concat!("repomirror/", env!("CARGO_PKG_VERSION"));

/// Immutable description of the upstream repository, built once at startup and shared by
/// everything that talks to it.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    base: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl OriginConfig {
    pub fn new(base: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        Self {
            base,
            connect_timeout,
            read_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.origin.clone(),
            settings.upstream_connect_timeout(),
            settings.upstream_read_timeout(),
        )
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn url_for(&self, relative_path: &str) -> String {
        format!("{}/{}", self.base, relative_path)
    }

    /// Upper bound for a header-only request, which never streams a body.
    pub fn probe_timeout(&self) -> Duration {
        self.connect_timeout + self.read_timeout
    }

    /// Builds the HTTP client used for downloads. Response bodies are never
    /// transparently decompressed, so `Content-Length` always describes the bytes
    /// that land on disk.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        self.client_builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build origin HTTP client")
    }

    /// Builds the HTTP client used for existence checks. Redirects are not followed:
    /// only a direct 200 means the origin has the artifact.
    pub fn build_existence_client(&self) -> Result<reqwest::Client> {
        self.client_builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build origin existence-check client")
    }

    fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
    }
}

/// `Content-Length` as sent by the origin; `None` when absent or unparseable.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` header.
pub(crate) fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
