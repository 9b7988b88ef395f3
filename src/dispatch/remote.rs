// Remote dispatcher client.
// Posts a batch to a fan-out service and decodes its streamed progress and result.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::error::{Result, StarboardError};
use crate::upstream::client::check_response;

use super::{DispatchEvent, DispatchItem, DispatchResult, Dispatcher, StreamDecoder};

/// Client for a remote fan-out service.
#[derive(Debug, Clone)]
pub struct RemoteDispatcher {
    client: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl RemoteDispatcher {
    pub fn new(client: Client, endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            token,
        }
    }

    /// Build from config; a missing endpoint or token surfaces on first use.
    pub fn from_config(client: Client, config: &DispatchConfig) -> Self {
        Self::new(client, config.endpoint.clone(), config.token().ok())
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            StarboardError::Config("dispatch.endpoint is required in remote mode".into())
        })?;
        let token = self
            .token
            .as_deref()
            .ok_or(StarboardError::MissingToken(crate::config::DISPATCH_TOKEN_ENV))?;
        Ok((endpoint, token))
    }
}

#[async_trait]
impl Dispatcher for RemoteDispatcher {
    async fn dispatch(&self, items: Vec<DispatchItem>) -> Result<Vec<DispatchResult>> {
        let (endpoint, token) = self.credentials()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let expected = items.len();

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(&items)
            .send()
            .await?;
        let response = check_response(response)?;

        let mut decoder = StreamDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for event in decoder.feed(&chunk?) {
                match event {
                    DispatchEvent::Progress(progress) => {
                        debug!(
                            completed = progress.completed,
                            succeeded = progress.succeeded,
                            failed = progress.failed,
                            total = progress.total,
                            "remote dispatch progress"
                        );
                    }
                    DispatchEvent::Final(results) => {
                        if results.len() != expected {
                            return Err(StarboardError::Malformed(format!(
                                "dispatcher returned {} results for {} items",
                                results.len(),
                                expected
                            )));
                        }
                        info!(items = expected, "remote dispatch finished");
                        return Ok(results);
                    }
                    DispatchEvent::Failed(message) => return Err(StarboardError::Other(message)),
                }
            }
        }

        Err(StarboardError::IncompleteStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Progress, wire};
    use crate::server::tests::{TOKEN, app_with_token};
    use axum::Router;
    use axum::http::header;
    use axum::routing::post;
    use tokio::net::TcpListener;

    async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    /// A fan-out endpoint that always answers with the given events.
    async fn canned(events: Vec<DispatchEvent>) -> String {
        let body: Vec<u8> = events.iter().flat_map(|e| wire::encode(e).to_vec()).collect();
        let app = Router::new().route(
            "/run",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }),
        );
        format!("{}/run", spawn(app).await)
    }

    fn remote(endpoint: String, token: &str) -> RemoteDispatcher {
        RemoteDispatcher::new(Client::new(), Some(endpoint), Some(token.into()))
    }

    fn items(urls: &[&str]) -> Vec<DispatchItem> {
        urls.iter().map(|u| DispatchItem::get(*u)).collect()
    }

    fn unthrottled() -> DispatchConfig {
        DispatchConfig {
            rate_per_second: 0,
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_against_served_router() {
        let base = spawn(app_with_token(unthrottled(), Some(TOKEN))).await;
        let dispatcher = remote(format!("{base}/api/dispatch"), TOKEN);

        let results = dispatcher
            .dispatch(items(&["https://m.test/a/b", "https://m.test/missing", "https://m.test/c/d"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result, Some(serde_json::json!({ "url": "https://m.test/a/b" })));
        assert_eq!(results[1].error.as_deref(), Some("HTTP 404"));
        assert_eq!(results[2].result, Some(serde_json::json!({ "url": "https://m.test/c/d" })));
    }

    #[tokio::test]
    async fn test_result_ceiling_arrives_as_error_frame() {
        let config = DispatchConfig {
            max_result_bytes: 10,
            ..unthrottled()
        };
        let base = spawn(app_with_token(config, Some(TOKEN))).await;
        let dispatcher = remote(format!("{base}/api/dispatch"), TOKEN);

        let err = dispatcher
            .dispatch(items(&["https://m.test/a/b", "https://m.test/c/d"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StarboardError::Other(ref m) if m.contains("exceed")), "{err}");
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected_by_status() {
        let base = spawn(app_with_token(unthrottled(), Some(TOKEN))).await;
        let dispatcher = remote(format!("{base}/api/dispatch"), "not-the-token");

        let err = dispatcher
            .dispatch(items(&["https://m.test/a/b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StarboardError::Status { status: 401, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_result_count_mismatch_is_malformed() {
        let endpoint = canned(vec![DispatchEvent::Final(vec![DispatchResult::failure(0, "x")])]).await;

        let err = remote(endpoint, TOKEN)
            .dispatch(items(&["https://m.test/1", "https://m.test/2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StarboardError::Malformed(_)), "{err}");
    }

    #[tokio::test]
    async fn test_error_frame_fails_the_batch() {
        let endpoint = canned(vec![DispatchEvent::Failed("fan-out overloaded".into())]).await;

        let err = remote(endpoint, TOKEN)
            .dispatch(items(&["https://m.test/1"]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fan-out overloaded");
    }

    #[tokio::test]
    async fn test_stream_without_result_is_incomplete() {
        let progress = Progress {
            index: 0,
            completed: 1,
            succeeded: 1,
            failed: 0,
            total: 2,
        };
        let endpoint = canned(vec![DispatchEvent::Progress(progress)]).await;

        let err = remote(endpoint, TOKEN)
            .dispatch(items(&["https://m.test/1", "https://m.test/2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StarboardError::IncompleteStream), "{err}");
    }

    #[tokio::test]
    async fn test_missing_token_is_a_config_error() {
        let dispatcher = RemoteDispatcher::new(
            Client::new(),
            Some("https://fanout.example.test/run".into()),
            None,
        );

        let err = dispatcher
            .dispatch(vec![DispatchItem::get("https://x.test/1")])
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_a_config_error() {
        let dispatcher = RemoteDispatcher::new(Client::new(), None, Some("t".into()));

        let err = dispatcher.dispatch(Vec::new()).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_the_round_trip() {
        let dispatcher = RemoteDispatcher::new(
            Client::new(),
            Some("http://127.0.0.1:9/unreachable".into()),
            Some("t".into()),
        );

        assert!(dispatcher.dispatch(Vec::new()).await.unwrap().is_empty());
    }
}
