use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::origin::{OriginConfig, content_length};

/// Header-only existence checks against the origin.
#[derive(Debug, Clone)]
pub struct ExistenceProbe {
    client: reqwest::Client,
    origin: Arc<OriginConfig>,
}

impl ExistenceProbe {
    pub fn new(client: reqwest::Client, origin: Arc<OriginConfig>) -> Self {
        Self { client, origin }
    }

    /// True only when the origin answers the HEAD request with 200. Transport errors count as
    /// "does not exist" and are never propagated.
    pub async fn exists(&self, url: &str) -> bool {
        self.head_ok(url).await.is_some()
    }

    /// Length advertised by a successful HEAD answer.
    pub async fn content_length(&self, url: &str) -> Option<u64> {
        self.head_ok(url).await.flatten()
    }

    async fn head_ok(&self, url: &str) -> Option<Option<u64>> {
        let response = match self
            .client
            .head(url)
            .timeout(self.origin.probe_timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "origin existence check failed");
                crate::metrics::record_probe("error");
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url, status = status.as_u16(), "origin does not have artifact");
            crate::metrics::record_probe("missing");
            return None;
        }

        crate::metrics::record_probe("exists");
        Some(content_length(response.headers()))
    }
}
