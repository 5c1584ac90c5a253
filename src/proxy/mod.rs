pub mod download;
pub mod entry;
pub mod gateway;
pub mod handler;
mod http;
pub mod listener;
pub mod locks;
pub mod origin;
pub mod probe;
pub mod resolver;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;

use self::handler::RequestHandler;

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub handler: Arc<dyn RequestHandler>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, handler: Arc<dyn RequestHandler>) -> Self {
        Self { settings, handler }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
