// Request executors.
// Turns one DispatchItem into one DispatchResult; never fails the batch.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::{Result, StarboardError};
use crate::retry::RetryPolicy;
use crate::upstream::client::check_response;

use super::{DispatchItem, DispatchResult};

/// Executes a single request. Failures are reported in the result.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, item: &DispatchItem) -> DispatchResult;
}

/// Executes requests over HTTP with reqwest, retrying transient failures per item.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    retry: RetryPolicy,
}

impl HttpExecutor {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StarboardError::Http)?;
        Ok(Self { client, retry })
    }

    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn send(&self, item: &DispatchItem) -> Result<DispatchResult> {
        let method = Method::from_bytes(item.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| StarboardError::Other(format!("invalid method {:?}", item.method)))?;

        let mut request = self.client.request(method, &item.url);
        for (name, value) in &item.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &item.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(StarboardError::Http)?;
        let response = check_response(response)?;
        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(StarboardError::Http)?;

        Ok(DispatchResult::success(
            status.as_u16(),
            headers,
            parse_body(text),
        ))
    }
}

/// JSON bodies are kept structured; anything else is passed through as a string.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, item: &DispatchItem) -> DispatchResult {
        match self.retry.run(&item.url, || self.send(item)).await {
            Ok(result) => result,
            Err(StarboardError::Status { status, .. }) => {
                DispatchResult::failure(status, format!("HTTP {status}"))
            }
            Err(error) => DispatchResult::failure(0, error.to_string()),
        }
    }
}
