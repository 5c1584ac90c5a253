use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Advisory per-path mutual exclusion for cache files. Entries whose lock nobody holds or
/// waits for are pruned on the next acquisition.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>,
}

/// Held while a request owns a cache path.
#[derive(Debug)]
pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let lock = {
            let mut map = self.inner.lock();
            map.retain(|_, lock| lock.strong_count() > 0);
            match map.get(path).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    map.insert(path.to_path_buf(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        PathGuard {
            _guard: lock.lock_owned().await,
        }
    }

    pub fn tracked_paths(&self) -> usize {
        let map = self.inner.lock();
        map.values().filter(|lock| lock.strong_count() > 0).count()
    }
}
