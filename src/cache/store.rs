use super::entry::CacheEntry;
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Address of one section's cache file: `<root>/<region>/<host>/<section>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub section: String,
    pub region: String,
    pub host: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(section: &str, region: &str, host: &str) -> Self {
        Self {
            section: section.to_string(),
            region: region.to_string(),
            host: host.to_string(),
        }
    }

    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.region).join(&self.host).join(&self.section)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.host, self.section)
    }
}

/// File-backed section cache.
///
/// Distinct keys never share a file. Access to the same key is serialized
/// through a per-key lock so concurrent region passes cannot interleave a
/// read with a half-written file.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl CacheStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    async fn lock_for(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Read a cache entry. Missing and corrupt files are both reported as absent.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache MISS: {}", key);
                return None;
            }
            Err(e) => {
                warn!("Cache UNREADABLE: {} ({})", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.timestamp.is_finite() => {
                debug!("Cache HIT: {} (timestamp {})", key, entry.timestamp);
                Some(entry)
            }
            Ok(_) => {
                warn!("Cache CORRUPT: {} (invalid timestamp)", path.display());
                None
            }
            Err(e) => {
                warn!("Cache CORRUPT: {} ({})", path.display(), e);
                None
            }
        }
    }

    /// Persist a payload with its fetch timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory or file cannot be written.
    pub async fn put(&self, key: &CacheKey, payload: &Value, timestamp: f64) -> Result<()> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry::new(payload.clone(), timestamp);
        let bytes = serde_json::to_vec(&entry)?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        info!("Cache STORE: {} ({}KB)", key, bytes.len() / 1024);
        Ok(())
    }
}
