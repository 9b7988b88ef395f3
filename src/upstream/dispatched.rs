// Metadata fetched through a fan-out dispatcher.
// Builds one request per repository, chunks them to the batch ceiling and maps results back.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::error::Result;

use super::client::UpstreamClient;
use super::types::RepositoryMetadata;
use super::{FetchOutcome, MetadataSource};

/// Metadata source that routes every fetch through a [`Dispatcher`].
pub struct DispatchedMetadata {
    client: Arc<UpstreamClient>,
    dispatcher: Arc<dyn Dispatcher>,
    batch_size: usize,
}

impl DispatchedMetadata {
    pub fn new(
        client: Arc<UpstreamClient>,
        dispatcher: Arc<dyn Dispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }
}

fn to_outcome(result: DispatchResult) -> FetchOutcome {
    if let Some(error) = result.error {
        return Err(error);
    }
    let value = result
        .result
        .ok_or_else(|| format!("empty response (HTTP {})", result.status))?;
    serde_json::from_value::<RepositoryMetadata>(value)
        .map_err(|e| format!("malformed metadata: {e}"))
}

#[async_trait]
impl MetadataSource for DispatchedMetadata {
    async fn fetch_batch(&self, repos: &[String]) -> Result<Vec<FetchOutcome>> {
        let mut outcomes = Vec::with_capacity(repos.len());

        for chunk in repos.chunks(self.batch_size) {
            let items = chunk
                .iter()
                .map(|repo| self.client.metadata_request(repo))
                .collect();

            match self.dispatcher.dispatch(items).await {
                Ok(results) => outcomes.extend(results.into_iter().map(to_outcome)),
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    warn!(repos = chunk.len(), error = %e, "dispatch batch failed");
                    let message = e.to_string();
                    outcomes.extend(chunk.iter().map(|_| Err(message.clone())));
                }
            }
        }

        Ok(outcomes)
    }
}
