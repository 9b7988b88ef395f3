// Cache store backends.
// Key to JSON-with-TTL storage on the filesystem or in memory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;

use super::keys;

/// Key-value storage with per-entry expiry.
///
/// Expired and never-written keys both read as `None`. Implementations must allow
/// concurrent use; concurrent writes to one key are last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// A stored value with its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` from now.
    pub fn new(key: &str, value: Value, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key: key.to_string(),
            value,
            expires_at,
        }
    }

    /// Check if this entry has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

/// Distinguishes temp files of concurrent writers within this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the platform cache directory.
    pub fn in_default_dir() -> Option<Self> {
        keys::cache_dir().map(|dir| Self::new(dir.join("entries")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(keys::file_name(key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            ".{}.{}.{}.tmp",
            keys::file_name(key),
            std::process::id(),
            n
        ))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&contents)?;
        if entry.is_expired(Utc::now()) {
            // Lazy eviction; a concurrent writer may already have replaced it.
            if let Err(e) = fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "could not evict expired cache entry");
            }
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let entry = CacheEntry::new(key, value, ttl);
        let json = serde_json::to_vec(&entry)?;

        // Write atomically via a writer-unique temp file
        let temp_path = self.temp_path_for(key);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, self.path_for(key)).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                debug!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "could not remove cache temp file"
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Longest lifetime handed to the in-memory cache.
const MAX_MEMORY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Expires each in-memory entry at its own `expires_at`.
struct EntryExpiry;

impl EntryExpiry {
    fn remaining(entry: &CacheEntry) -> Duration {
        (entry.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_MEMORY_TTL)
    }
}

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Self::remaining(entry))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::remaining(entry))
    }
}

/// In-process store backed by moka. Contents are lost on restart.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: MokaCache<String, CacheEntry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: MokaCache::builder().expire_after(EntryExpiry).build(),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .get(key)
            .await
            .filter(|entry| !entry.is_expired(Utc::now()))
            .map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl);
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}
