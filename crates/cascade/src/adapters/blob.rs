//! Durable key/value storage backing the warm and cold tiers
//!
//! The cache treats a blob store as opaque: it writes encoded records under
//! their hyphenated id and reads them back. Two implementations are provided:
//!
//! - [`MemoryBlobStore`]: in-process map with fault injection for tests
//! - [`FsBlobStore`]: one file per key, written atomically via rename

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors reported by blob store implementations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob store unavailable: {0}")]
    Unavailable(String),
    #[error("Blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
}

/// Durable key → bytes storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value. Returns only
    /// once the value is durable.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Every key currently stored. Only used by the startup recovery scan.
    async fn keys(&self) -> Result<Vec<String>, BlobError>;

    /// Store name for logging
    fn name(&self) -> &'static str;
}

/// In-process blob store.
///
/// Faults can be switched on at runtime to exercise the storage failure
/// paths of the cache.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
    unavailable: AtomicBool,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    latency_ms: AtomicU64,
    gets: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail only writes while set
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Fail only deletes while set
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    /// Number of `get` calls served so far
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    async fn simulate(&self, op: &str) -> Result<(), BlobError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("memory store offline ({op})")));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), BlobError> {
        self.simulate("put").await?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected put failure".to_string()));
        }
        self.blobs.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        self.simulate("get").await?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.get(key).map(|v| v.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.simulate("delete").await?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected delete failure".to_string()));
        }
        self.blobs.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BlobError> {
        self.simulate("keys").await?;
        Ok(self.blobs.iter().map(|e| e.key().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

const TEMP_SUFFIX: &str = ".tmp";

/// File-per-key blob store.
///
/// Writes go to a hidden temp file which is fsynced and then renamed over
/// the final path, so a crash leaves either the old blob or the new one.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!("Opened blob store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!(".{key}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple()))
    }
}

/// Flush a directory's entries to disk
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), BlobError> {
    let dir = tokio::fs::File::open(dir).await?;
    dir.sync_all().await?;
    Ok(())
}

/// Directories cannot be opened as files on this platform
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), BlobError> {
    Ok(())
}

fn validate_key(key: &str) -> Result<(), BlobError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        let tmp = self.temp_path_for(key);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&value).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobError::Io(e));
        }
        // Persist the rename itself
        sync_dir(&self.root).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Leftover temp files from an interrupted put
            if name.starts_with('.') {
                if name.ends_with(TEMP_SUFFIX) {
                    let _ = tokio::fs::remove_file(entry.path()).await;
                }
                continue;
            }
            if validate_key(&name).is_ok() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
