use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self as async_fs, File, OpenOptions};

use super::resolver::ResolvedTarget;

/// One artifact file in the cache directory. A partially downloaded artifact is an ordinary
/// file at its final path; only its size tells it apart from a complete one.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    relative_path: String,
    path: PathBuf,
}

impl CacheEntry {
    pub fn new(relative_path: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            path: path.into(),
        }
    }

    pub fn from_target(target: &ResolvedTarget) -> Self {
        Self::new(target.relative_path.clone(), target.local_path.clone())
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A regular file exists at the entry's path. Says nothing about completeness.
    pub async fn is_present(&self) -> bool {
        async_fs::metadata(&self.path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Bytes currently on disk; zero when the file does not exist.
    pub async fn size_on_disk(&self) -> u64 {
        async_fs::metadata(&self.path)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    pub async fn ensure_parent(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                async_fs::create_dir_all(parent).await
            }
            _ => Ok(()),
        }
    }

    /// Opens the file for appending, creating it when missing. Existing bytes are never
    /// truncated.
    pub async fn open_append(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }

    /// Opens the file for reading together with its length at open time.
    pub async fn open_read(&self) -> io::Result<(File, u64)> {
        let file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", self.path.display()),
            ));
        }
        Ok((file, meta.len()))
    }
}
