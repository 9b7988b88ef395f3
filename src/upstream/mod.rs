// Upstream data sources.
// The daily-activity feed and the repository metadata service, behind traits.

pub mod client;
pub mod dispatched;
pub mod endpoints;
pub mod types;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;

pub use client::UpstreamClient;
pub use dispatched::DispatchedMetadata;
pub use types::{DailyDocument, RepositoryMetadata};

/// Outcome of one repository's metadata fetch; the error is a display message.
pub type FetchOutcome = std::result::Result<RepositoryMetadata, String>;

/// Source of per-day ranked activity documents.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn daily(&self, date: NaiveDate) -> Result<DailyDocument>;
}

/// Source of repository metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch every repository, returning one outcome per input in input order.
    ///
    /// Per-repository failures are reported inline. `Err` is reserved for
    /// configuration problems that make the whole batch meaningless.
    async fn fetch_batch(&self, repos: &[String]) -> Result<Vec<FetchOutcome>>;
}
