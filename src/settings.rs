use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::cli::{Cli, LogFormat};
use crate::proxy::download::DEFAULT_MAX_ATTEMPTS;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_origin() -> String {
    "https://repo.maven.apache.org/maven2".to_string()
}

fn default_virtual_prefix() -> String {
    "repositorio-local".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("repositorio-local")
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_client_timeout() -> u64 {
    30
}

fn default_max_header_size() -> usize {
    32 * 1024
}

fn default_upstream_connect_timeout() -> u64 {
    10
}

fn default_upstream_read_timeout() -> u64 {
    60
}

fn default_max_download_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_virtual_prefix")]
    pub virtual_prefix: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_read_timeout")]
    pub upstream_read_timeout: u64,
    #[serde(default = "default_max_download_attempts")]
    pub max_download_attempts: u32,
    /// Serialize requests for the same cache path instead of letting them race.
    #[serde(default)]
    pub lock_cache_paths: bool,
    /// Compare a cached file's size with the origin before serving it.
    #[serde(default)]
    pub verify_local_size: bool,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            origin: default_origin(),
            virtual_prefix: default_virtual_prefix(),
            cache_dir: default_cache_dir(),
            log: default_log_format(),
            client_timeout: default_client_timeout(),
            max_header_size: default_max_header_size(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_read_timeout: default_upstream_read_timeout(),
            max_download_attempts: default_max_download_attempts(),
            lock_cache_paths: false,
            verify_local_size: false,
            metrics_listen: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("REPOMIRROR")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        if let Some(port) = cli.port {
            settings.listen.set_port(port);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_read_timeout)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        let origin = Url::parse(&self.origin)
            .with_context(|| format!("origin '{}' is not a valid URL", self.origin))?;
        ensure!(
            matches!(origin.scheme(), "http" | "https"),
            "origin must use http or https (got '{}')",
            origin.scheme()
        );
        ensure!(
            origin.host_str().is_some(),
            "origin '{}' has no host",
            self.origin
        );
        ensure!(
            !self.cache_dir.as_os_str().is_empty(),
            "cache_dir must not be empty"
        );
        ensure!(
            !self.virtual_prefix.contains('/'),
            "virtual_prefix must be a single path segment (got '{}')",
            self.virtual_prefix
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.max_header_size > 0,
            "max_header_size must be greater than 0 (got {})",
            self.max_header_size
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_read_timeout > 0,
            "upstream_read_timeout must be greater than 0 seconds (got {})",
            self.upstream_read_timeout
        );
        ensure!(
            self.max_download_attempts > 0,
            "max_download_attempts must be at least 1 (got {})",
            self.max_download_attempts
        );
        if let Some(metrics) = self.metrics_listen
            && metrics == self.listen
        {
            bail!("metrics_listen must differ from listen ({metrics})");
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = cli.config.as_deref() {
        ensure!(
            path.exists(),
            "configuration file {} does not exist",
            path.display()
        );
        return Ok(Some(path.to_path_buf()));
    }

    Ok(default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists()))
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/repomirror/repomirror.toml"),
        PathBuf::from("repomirror.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
