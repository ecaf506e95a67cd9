//! Durable key/value stores for drafts.
//!
//! The drafts of a session are one opaque blob under one key. A store
//! only has to keep blobs across process restarts on this device; it is
//! never shared between devices, so there is no merge or versioning.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::trace;

use crate::DraftError;

/// A durable per-device key/value store.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because the store is shared with the
/// write-behind task, which outlives the call that created it.
pub trait DurableStore: Send + Sync + 'static {
    /// Reads the blob under `key`. `Ok(None)` if nothing is stored.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, DraftError>> + Send;

    /// Replaces the blob under `key`.
    fn set(
        &self,
        key: &str,
        blob: Vec<u8>,
    ) -> impl Future<Output = Result<(), DraftError>> + Send;

    /// Deletes the blob under `key`. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), DraftError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A [`DurableStore`] that lives in memory. Nothing survives a restart;
/// use it in tests or for sessions that shouldn't leave traces.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DraftError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), DraftError> {
        self.lock().insert(key.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DraftError> {
        self.lock().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// A [`DurableStore`] keeping one file per key in a directory.
///
/// Writes go to a temporary sibling first and are renamed into place,
/// so a crash mid-write leaves the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Stores blobs under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `key`. Characters outside `[A-Za-z0-9._-]` become
    /// `_` so a key can never escape the directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DraftError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, blob: Vec<u8>) -> Result<(), DraftError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &path).await?;
        trace!(path = %path.display(), bytes = blob.len(), "draft blob written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DraftError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
