pub mod cli;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{proxy::gateway::CacheGateway, settings::Settings};

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    tokio::fs::create_dir_all(&settings.cache_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create cache directory {}",
                settings.cache_dir.display()
            )
        })?;
    let gateway = CacheGateway::from_settings(&settings)?;
    tracing::info!(
        lock_cache_paths = settings.lock_cache_paths,
        verify_local_size = settings.verify_local_size,
        max_download_attempts = settings.max_download_attempts,
        "cache gateway ready"
    );

    let app = proxy::AppContext::new(settings, Arc::new(gateway));
    proxy::run(app).await
}
