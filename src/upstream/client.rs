// Upstream HTTP client.
// Shared reqwest client with default headers, status checking and retry.

use reqwest::{
    Client, Response,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::error::{Result, StarboardError};
use crate::retry::RetryPolicy;

const CLIENT_USER_AGENT: &str = concat!("starboard/", env!("CARGO_PKG_VERSION"));

/// Client for the daily-activity source and the metadata service.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    activity_base_url: String,
    metadata_base_url: String,
    metadata_token: Option<String>,
    metadata_concurrency: usize,
    retry: RetryPolicy,
}

impl UpstreamClient {
    /// Create a client from source settings. The metadata token is optional.
    pub fn new(
        sources: &SourcesConfig,
        metadata_token: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(sources.timeout())
            .build()
            .map_err(StarboardError::Http)?;

        Ok(Self {
            client,
            activity_base_url: sources.activity_base_url.trim_end_matches('/').to_string(),
            metadata_base_url: sources.metadata_base_url.trim_end_matches('/').to_string(),
            metadata_token,
            metadata_concurrency: sources.metadata_concurrency.max(1),
            retry,
        })
    }

    /// Create a client reading the metadata token from the environment.
    pub fn from_env(sources: &SourcesConfig, retry: RetryPolicy) -> Result<Self> {
        Self::new(sources, sources.metadata_token(), retry)
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn activity_base_url(&self) -> &str {
        &self.activity_base_url
    }

    pub fn metadata_base_url(&self) -> &str {
        &self.metadata_base_url
    }

    pub fn metadata_token(&self) -> Option<&str> {
        self.metadata_token.as_deref()
    }

    pub fn metadata_concurrency(&self) -> usize {
        self.metadata_concurrency
    }

    /// GET a URL and decode the JSON body, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, bearer: Option<&str>) -> Result<T> {
        self.retry
            .run(url, || async move {
                let mut request = self.client.get(url);
                if let Some(token) = bearer {
                    request = request.bearer_auth(token);
                }

                let response = request.send().await.map_err(StarboardError::Http)?;
                let response = check_response(response)?;
                let body = response.bytes().await.map_err(StarboardError::Http)?;
                debug!(url, bytes = body.len(), "upstream response");

                serde_json::from_slice(&body).map_err(|e| StarboardError::Malformed(e.to_string()))
            })
            .await
    }
}

/// Check response status and convert non-2xx into an error.
pub fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StarboardError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}
