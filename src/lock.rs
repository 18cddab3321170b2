//! Cross-process writer lock for an index directory.
//!
//! Only one reconcile may run against an index directory at a time. The lock
//! is an exclusive advisory lock on `<index_dir>/index.lock`, held by the
//! returned guard and released when it drops, including on error paths.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fs2::FileExt;

use crate::error::{IndexError, Result};

pub struct IndexWriteLock {
    file: std::fs::File,
    path: PathBuf,
}

impl IndexWriteLock {
    /// Block (off the async runtime) until the exclusive lock is held.
    pub async fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexError::storage(parent, e))?;
        }

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| IndexError::storage(&path, e))?;

            let start = Instant::now();
            file.lock_exclusive()
                .map_err(|e| IndexError::storage(&path, e))?;
            let waited_ms = start.elapsed().as_millis() as u64;
            if waited_ms > 0 {
                tracing::debug!(path = %path.display(), waited_ms, "acquired index write lock");
            }

            Ok(IndexWriteLock { file, path })
        })
        .await
        .map_err(|e| IndexError::Configuration(format!("index lock task failed: {e}")))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lock_is_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idx").join("index.lock");

        let first = IndexWriteLock::acquire(&path).await.unwrap();
        assert_eq!(first.path(), path.as_path());
        drop(first);

        // Re-acquiring after drop must not block.
        let second = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            IndexWriteLock::acquire(&path),
        )
        .await
        .expect("lock was not released")
        .unwrap();
        drop(second);
    }
}
