//! Blob storage backends
//!
//! Artifacts are addressed by slash-separated relative paths such as
//! `{snapshot_id}/{template}.json`. The filesystem backend maps them under a
//! root directory; the memory backend keeps them in a map.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    /// `Err(NotFound)` when nothing is stored at `path`
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Entries whose path starts with `prefix`, sorted by path
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;

    /// Deleting a missing path is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Filesystem-backed blob store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(SyncError::Storage(format!("invalid blob path: {}", path)));
        }
        Ok(self.root.join(relative))
    }

    fn collect(dir: &Path, root: &Path, out: &mut Vec<BlobEntry>) -> std::io::Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                Self::collect(&path, root, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(BlobEntry {
                    path: rel,
                    size: meta.len(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // write-then-rename so readers never observe a half-written artifact
        let tmp = target.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let mut entries = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            FsBlobStore::collect(&root, &root, &mut out).map(|_| out)
        })
        .await??;

        entries.retain(|e| e.path.starts_with(&prefix) && !e.path.ends_with(".tmp"));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| SyncError::Storage("memory blob store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.lock()?.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| BlobEntry {
                path: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.lock()?.remove(path);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
