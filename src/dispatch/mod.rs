// Fan-out dispatch.
// Runs a batch of HTTP requests under a concurrency and rate ceiling, one result per item.

pub mod executor;
pub mod limiter;
pub mod pool;
pub mod remote;
pub mod wire;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DispatchConfig;
use crate::error::{Result, StarboardError};

pub use executor::{HttpExecutor, RequestExecutor};
pub use limiter::RateLimiter;
pub use pool::LocalDispatcher;
pub use remote::RemoteDispatcher;
pub use wire::StreamDecoder;

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchItem {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

impl DispatchItem {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// Outcome of one request. `status` is 0 when no response was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn success(status: u16, headers: BTreeMap<String, String>, result: Value) -> Self {
        Self {
            status,
            headers,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Running counts after one item completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Input position of the item that just completed.
    pub index: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Event emitted while a batch runs. `Final` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Progress(Progress),
    Final(Vec<DispatchResult>),
    Failed(String),
}

/// Runs a batch of requests.
///
/// The output has the input's length and order; a failing item only sets its
/// own `error`. `Err` means the batch as a whole was rejected or lost.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, items: Vec<DispatchItem>) -> Result<Vec<DispatchResult>>;
}

/// Size ceilings applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_batch_items: usize,
    pub max_item_bytes: usize,
    pub max_result_bytes: usize,
}

impl DispatchLimits {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_batch_items: config.max_batch_items,
            max_item_bytes: config.max_item_bytes,
            max_result_bytes: config.max_result_bytes,
        }
    }

    /// Reject a batch up front if it or any item is over its ceiling.
    pub fn check_items(&self, items: &[DispatchItem]) -> Result<()> {
        if items.len() > self.max_batch_items {
            return Err(StarboardError::BatchTooLarge {
                count: items.len(),
                limit: self.max_batch_items,
            });
        }

        for (index, item) in items.iter().enumerate() {
            let size = serde_json::to_vec(item)?.len();
            if size > self.max_item_bytes {
                return Err(StarboardError::ItemTooLarge {
                    index,
                    size,
                    limit: self.max_item_bytes,
                });
            }
        }

        Ok(())
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> DispatchLimits {
        DispatchLimits {
            max_batch_items: 3,
            max_item_bytes: 200,
            max_result_bytes: 1024,
        }
    }

    #[test]
    fn test_item_defaults_when_deserializing() {
        let item: DispatchItem =
            serde_json::from_value(json!({ "url": "https://example.test/a" })).unwrap();
        assert_eq!(item, DispatchItem::get("https://example.test/a"));
    }

    #[test]
    fn test_batch_within_limits() {
        let items = vec![DispatchItem::get("https://example.test/a"); 3];
        assert!(limits().check_items(&items).is_ok());
    }

    #[test]
    fn test_too_many_items_rejected() {
        let items = vec![DispatchItem::get("https://example.test/a"); 4];
        let err = limits().check_items(&items).unwrap_err();
        assert!(matches!(err, StarboardError::BatchTooLarge { count: 4, limit: 3 }));
    }

    #[test]
    fn test_oversized_item_rejected() {
        let mut big = DispatchItem::get("https://example.test/b");
        big.method = "POST".into();
        big.body = Some("x".repeat(500));
        let items = vec![DispatchItem::get("https://example.test/a"), big];

        let err = limits().check_items(&items).unwrap_err();
        assert!(matches!(err, StarboardError::ItemTooLarge { index: 1, .. }));
    }
}
