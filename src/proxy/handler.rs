use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use tokio::fs::File;

use super::locks::PathGuard;

/// What the dispatcher hands to a handler for one GET request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub peer: SocketAddr,
    /// Request path as sent by the client, query included.
    pub path: String,
}

/// Whether the artifact was already in the cache when the request arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    /// Present locally but shorter than the origin's copy.
    Partial,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Partial => "partial",
            CacheStatus::Miss => "miss",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ResponseBody {
    Text(String),
    /// An open cache file and the size observed when it was opened.
    File { file: File, len: u64 },
}

impl ResponseBody {
    /// Value of the `Content-Length` header.
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Text(text) => text.len() as u64,
            ResponseBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub outcome: &'static str,
    pub cache: Option<CacheStatus>,
    pub attempts: u32,
    pub error_reason: Option<String>,
    /// Held until the response has been written, then released with the response.
    pub(crate) guard: Option<PathGuard>,
}

impl Response {
    fn new(status: StatusCode, body: ResponseBody, outcome: &'static str) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            outcome,
            cache: None,
            attempts: 0,
            error_reason: None,
            guard: None,
        }
    }

    pub fn artifact(file: File, len: u64, outcome: &'static str) -> Self {
        let mut response = Self::new(StatusCode::OK, ResponseBody::File { file, len }, outcome);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        response
    }

    /// Plain-text error response whose body is the reason.
    pub fn error(status: StatusCode, reason: impl fmt::Display, outcome: &'static str) -> Self {
        let reason = reason.to_string();
        let mut response = Self::new(status, ResponseBody::Text(reason.clone()), outcome);
        response.error_reason = Some(reason);
        response
    }

    pub fn not_found(reason: impl fmt::Display, outcome: &'static str) -> Self {
        Self::error(StatusCode::NOT_FOUND, reason, outcome)
    }

    pub fn method_not_allowed() -> Self {
        let mut response = Self::error(
            StatusCode::METHOD_NOT_ALLOWED,
            "only GET is supported",
            "METHOD_NOT_ALLOWED",
        );
        response
            .headers
            .insert(header::ALLOW, HeaderValue::from_static("GET"));
        response
    }

    pub fn bad_request(reason: impl fmt::Display) -> Self {
        Self::error(StatusCode::BAD_REQUEST, reason, "BAD_REQUEST")
    }

    pub fn with_cache(mut self, cache: CacheStatus) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub(crate) fn with_guard(mut self, guard: Option<PathGuard>) -> Self {
        self.guard = guard;
        self
    }
}

/// Turns a GET request into a response. Implementations never fail: every
/// error is expressed as a response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &RequestContext) -> Response;
}
