use crate::codec;
use crate::error::{Result, TrackerError};
use crate::sample::Sample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Blob holding the encoded backlog
pub const BACKLOG_BLOB: &str = "locationBacklog";
/// Blob holding [`RecorderState`]
pub const STATE_BLOB: &str = "recorderState";

/// Durable named-blob storage.
///
/// `load` returns `Ok(None)` when the blob does not exist; that is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Coordinator state that survives a process restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderState {
    pub recording: bool,
}

impl RecorderState {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Read and decode the backlog blob. `Ok(None)` when nothing was saved yet,
/// `TrackerError::Codec` when the blob is unreadable.
pub async fn load_backlog(store: &dyn BlobStore) -> Result<Option<Vec<Sample>>> {
    match store.load(BACKLOG_BLOB).await? {
        Some(bytes) => Ok(Some(codec::decode_samples(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn save_backlog(store: &dyn BlobStore, samples: &[Sample]) -> Result<()> {
    store.save(BACKLOG_BLOB, &codec::encode_samples(samples)).await
}

/// One file per blob inside a directory
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Create the store, creating `dir` if missing
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            TrackerError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(name);
        let tmp = path.with_extension("tmp");

        // Write aside and rename so a crash never leaves a half-written blob
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            TrackerError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            TrackerError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-memory store, mostly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read without going through the async trait
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok().and_then(|b| b.get(name).cloned())
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(name.to_string(), bytes);
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire blob lock".to_string()))?;
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire blob lock".to_string()))?;
        Ok(blobs.get(name).cloned())
    }
}
