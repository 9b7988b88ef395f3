// Cache module.
// Best-effort typed access to a key/value store shared by every pipeline stage.

pub mod keys;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

pub use keys::CacheKeys;
pub use store::{CacheEntry, CacheStore, FileStore, MemoryStore};

/// When a guarded list was last regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMarker {
    pub last_refreshed_at: DateTime<Utc>,
}

/// Shared cache handle.
///
/// Every store failure is logged and swallowed: reads degrade to a miss and
/// writes to a no-op, so callers never see cache errors.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    keys: CacheKeys,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, keys: CacheKeys) -> Self {
        Self { store, keys }
    }

    /// In-memory cache, mostly for tests.
    pub fn in_memory(version: &str) -> Self {
        Self::new(Arc::new(MemoryStore::new()), CacheKeys::new(version))
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// Read and decode a value. Missing, expired, unreadable and undecodable
    /// entries all come back as `None`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.store.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!(key, "cache hit");
                Some(decoded)
            }
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape, treating as miss");
                None
            }
        }
    }

    /// Encode and write a value.
    pub async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable, skipping write");
                return;
            }
        };

        if let Err(e) = self.store.put(key, value, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
    }

    /// Write a value and its refresh marker stamped with `now`.
    pub async fn write_with_marker<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        self.write(key, value, ttl).await;
        let marker = RefreshMarker {
            last_refreshed_at: now,
        };
        self.write(&CacheKeys::marker(key), &marker, ttl).await;
    }

    /// Refresh marker guarding `key`, if any.
    pub async fn marker(&self, key: &str) -> Option<RefreshMarker> {
        self.read(&CacheKeys::marker(key)).await
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "cache delete failed");
        }
    }
}
