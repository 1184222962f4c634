//! Key-value caches used to survive process restarts mid-session.
//!
//! [`MemoryCache`] lives only as long as the process and is what tests use.
//! [`FileCache`] persists every write to a JSON file so a restarted process
//! finds the order ids the previous run stored.

use crate::error::CacheError;
use crate::traits::KeyValueCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn new(value: &[u8], ttl: Duration) -> Result<Self, CacheError> {
        let value = String::from_utf8(value.to_vec())
            .map_err(|e| CacheError::Encoding(format!("value is not UTF-8: {e}")))?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Encoding(format!("ttl out of range: {e}")))?;
        Ok(Self {
            value,
            expires_at: Utc::now() + ttl,
        })
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone().into_bytes())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry::new(value, ttl)?;
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Cache persisted to a JSON file on every write.
pub struct FileCache {
    path: PathBuf,
    entries: tokio::sync::Mutex<HashMap<String, Entry>>,
}

impl FileCache {
    /// Opens the cache at `path`, loading any entries a previous run left.
    /// Expired entries are dropped on load.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let mut entries: HashMap<String, Entry> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        entries.retain(|_, e| e.is_live(now));
        debug!(path = %path.display(), entries = entries.len(), "Opened file cache");

        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, Entry>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Utc::now()))
            .map(|e| e.value.clone().into_bytes()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry::new(value, ttl)?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), entry);
        self.persist(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn memory_cache_round_trips_values() {
        let cache = MemoryCache::new();
        cache.set("straddle:SELL_CE", b"230101000001", TTL).await.unwrap();

        let value = cache.get("straddle:SELL_CE").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"230101000001"[..]));
        assert_eq!(cache.get("straddle:SELL_PE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_cache_drops_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn memory_cache_delete_removes_key() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", TTL).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cache.json");

        let cache = FileCache::open(&path).await.unwrap();
        cache.set("straddle:SL_PE", b"230101000004", TTL).await.unwrap();
        cache.set("gone", b"x", Duration::ZERO).await.unwrap();
        drop(cache);

        let reopened = FileCache::open(&path).await.unwrap();
        let value = reopened.get("straddle:SL_PE").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"230101000004"[..]));
        assert_eq!(reopened.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_cache_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(FileCache::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn non_utf8_values_are_rejected() {
        let cache = MemoryCache::new();
        let err = cache.set("k", &[0xff, 0xfe], TTL).await.unwrap_err();
        assert!(matches!(err, CacheError::Encoding(_)));
    }
}
