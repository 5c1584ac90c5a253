use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

pub struct TestDirs {
    _temp: TempDir,
    pub cache_dir: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let cache_dir = temp.path().join("repositorio-local");
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            _temp: temp,
            cache_dir,
        })
    }

    /// Cache path for an artifact path relative to the cache root.
    pub fn artifact_path(&self, relative: &str) -> PathBuf {
        self.cache_dir.join(relative)
    }

    /// Places a file in the cache as if an earlier request had written it.
    pub fn seed_artifact(&self, relative: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn read_artifact(&self, relative: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.artifact_path(relative))?)
    }

    pub fn root(&self) -> &Path {
        &self.cache_dir
    }
}
