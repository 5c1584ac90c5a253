use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::origin::OriginConfig;

/// Where a request path lives locally and upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Artifact path relative to both the cache root and the origin base.
    pub relative_path: String,
    pub local_path: PathBuf,
    pub remote_url: String,
}

/// Maps request paths onto the cache directory and the origin. Pure: no I/O, no failure mode.
#[derive(Debug, Clone)]
pub struct PathResolver {
    cache_root: PathBuf,
    virtual_prefix: String,
    origin: Arc<OriginConfig>,
}

impl PathResolver {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        virtual_prefix: impl Into<String>,
        origin: Arc<OriginConfig>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            virtual_prefix: virtual_prefix.into(),
            origin,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn resolve(&self, raw_path: &str) -> ResolvedTarget {
        let segments = artifact_segments(raw_path, &self.virtual_prefix);
        let relative_path = segments.join("/");
        let mut local_path = self.cache_root.clone();
        local_path.extend(&segments);
        let remote_url = self.origin.url_for(&relative_path);
        ResolvedTarget {
            relative_path,
            local_path,
            remote_url,
        }
    }
}

/// Splits a request path into artifact segments. The query and fragment are ignored,
/// empty, `.` and `..` segments are dropped so the result stays under the cache root,
/// and a leading virtual prefix segment is removed.
fn artifact_segments<'a>(raw_path: &'a str, virtual_prefix: &str) -> Vec<&'a str> {
    let path = raw_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let mut segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .collect();
    if !virtual_prefix.is_empty() && segments.first() == Some(&virtual_prefix) {
        segments.remove(0);
    }
    segments
}
