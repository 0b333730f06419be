//! Object storage for episodes, the episode index and the podcast feed.
//!
//! The namespace is flat: `{article_id}.{ext}` for episodes plus a couple of
//! fixed keys. Writes replace whole objects and are atomic per key.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PodcastError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key currently stored.
    async fn list(&self) -> Result<HashSet<String>>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous object in one step.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Stores objects as files in a single directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Using local storage at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(PodcastError::Storage {
                message: format!("invalid object key '{}'", key),
            });
        }
        Ok(self.root.join(key))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // dotfiles are in-flight temporaries
                if !name.starts_with('.') {
                    keys.insert(name.to_string());
                }
            }
        }
        debug!("Listed {} objects in {}", keys.len(), self.root.display());
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path_for(key)?;
        let tmp = self.root.join(format!(".{}.tmp", key));
        let write = async {
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, &target).await
        };
        write.await.map_err(|e| PodcastError::StorageWriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        debug!("Wrote {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }
}

/// Keeps objects in memory. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self) -> Result<HashSet<String>> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
