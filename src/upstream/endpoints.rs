// Upstream endpoint functions.
// URL construction and typed fetches for daily documents and repository metadata.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::dispatch::DispatchItem;
use crate::error::Result;

use super::client::UpstreamClient;
use super::types::{DailyDocument, RepositoryMetadata};
use super::{ActivitySource, FetchOutcome, MetadataSource};

impl UpstreamClient {
    /// URL of one day's activity document.
    pub fn daily_url(&self, date: NaiveDate) -> String {
        format!("{}/{}.json", self.activity_base_url(), date.format("%Y-%m-%d"))
    }

    /// URL of one repository's metadata.
    pub fn metadata_url(&self, repo: &str) -> String {
        format!("{}/{}", self.metadata_base_url(), repo)
    }

    /// Get one day's activity document.
    pub async fn get_daily(&self, date: NaiveDate) -> Result<DailyDocument> {
        let value: Value = self.get_json(&self.daily_url(date), None).await?;
        DailyDocument::from_value(value)
    }

    /// Get one repository's metadata.
    pub async fn get_metadata(&self, repo: &str) -> Result<RepositoryMetadata> {
        self.get_json(&self.metadata_url(repo), self.metadata_token())
            .await
    }

    /// The metadata fetch for `repo` as a dispatchable request.
    pub fn metadata_request(&self, repo: &str) -> DispatchItem {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        if let Some(token) = self.metadata_token() {
            headers.insert("authorization".to_string(), format!("Bearer {token}"));
        }

        DispatchItem {
            url: self.metadata_url(repo),
            method: "GET".into(),
            headers,
            body: None,
        }
    }
}

#[async_trait]
impl ActivitySource for UpstreamClient {
    async fn daily(&self, date: NaiveDate) -> Result<DailyDocument> {
        self.get_daily(date).await
    }
}

/// Direct mode: one GET per repository, a bounded number in flight.
#[async_trait]
impl MetadataSource for UpstreamClient {
    async fn fetch_batch(&self, repos: &[String]) -> Result<Vec<FetchOutcome>> {
        let outcomes = stream::iter(repos.iter().cloned())
            .map(|repo| async move { self.get_metadata(&repo).await.map_err(|e| e.to_string()) })
            .buffered(self.metadata_concurrency())
            .collect()
            .await;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::retry::RetryPolicy;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn client(token: Option<&str>) -> UpstreamClient {
        let sources = SourcesConfig {
            activity_base_url: "https://stars.example.test/daily".into(),
            metadata_base_url: "https://meta.example.test/repos/".into(),
            ..SourcesConfig::default()
        };
        UpstreamClient::new(&sources, token.map(String::from), RetryPolicy::none()).unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client(None);
        let date = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();

        assert_eq!(
            client.daily_url(date),
            "https://stars.example.test/daily/2025-01-09.json"
        );
        assert_eq!(
            client.metadata_url("rust-lang/rust"),
            "https://meta.example.test/repos/rust-lang/rust"
        );
    }

    #[test]
    fn test_metadata_request_carries_token() {
        let item = client(Some("secret")).metadata_request("a/b");
        assert_eq!(item.method, "GET");
        assert_eq!(item.url, "https://meta.example.test/repos/a/b");
        assert_eq!(
            item.headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );

        let anonymous = client(None).metadata_request("a/b");
        assert!(!anonymous.headers.contains_key("authorization"));
    }

    async fn metadata_route(Path((owner, name)): Path<(String, String)>) -> Response {
        if owner == "gone" {
            return StatusCode::NOT_FOUND.into_response();
        }
        Json(json!({ "repository": { "full_name": format!("{owner}/{name}") } })).into_response()
    }

    async fn metadata_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/repos/:owner/:name", get(metadata_route));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/repos")
    }

    #[tokio::test]
    async fn test_direct_batch_keeps_order_and_isolates_failures() {
        let sources = SourcesConfig {
            metadata_base_url: metadata_server().await,
            metadata_concurrency: 2,
            ..SourcesConfig::default()
        };
        let client = UpstreamClient::new(&sources, None, RetryPolicy::none()).unwrap();
        let repos: Vec<String> = ["a/b", "gone/x", "c/d", "e/f"].map(String::from).into();

        let outcomes = client.fetch_batch(&repos).await.unwrap();

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].as_ref().unwrap().repository.full_name, "a/b");
        assert!(outcomes[1].as_ref().unwrap_err().contains("404"));
        assert_eq!(outcomes[2].as_ref().unwrap().repository.full_name, "c/d");
        assert_eq!(outcomes[3].as_ref().unwrap().repository.full_name, "e/f");
    }
}
