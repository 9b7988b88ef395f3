// Day aggregator.
// One calendar day's ranked list, fetched upstream on a cache miss and stored pre-sorted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::upstream::ActivitySource;

use super::ScoreMap;

/// Fetches and caches per-day score maps.
#[derive(Clone)]
pub struct DayAggregator {
    source: Arc<dyn ActivitySource>,
    cache: Cache,
    closed_day_ttl: Duration,
    open_day_ttl: Duration,
}

impl DayAggregator {
    pub fn new(source: Arc<dyn ActivitySource>, cache: Cache, config: &CacheConfig) -> Self {
        Self {
            source,
            cache,
            closed_day_ttl: config.closed_day_ttl(),
            open_day_ttl: config.open_day_ttl(),
        }
    }

    /// Scores for `date`, highest first, at most `limit` entries.
    ///
    /// Upstream failures yield an empty map.
    pub async fn get_day(&self, date: NaiveDate, limit: Option<usize>) -> ScoreMap {
        self.get_day_with(date, limit, false).await
    }

    /// Like [`get_day`](Self::get_day), optionally skipping the cache read.
    pub async fn get_day_with(
        &self,
        date: NaiveDate,
        limit: Option<usize>,
        bypass_cache: bool,
    ) -> ScoreMap {
        match self.load(date, bypass_cache).await {
            Ok(mut scores) => {
                scores.truncate(limit);
                scores
            }
            Err(e) => {
                warn!(%date, error = %e, "daily activity unavailable, using empty scores");
                ScoreMap::default()
            }
        }
    }

    /// The full score map for `date`, or the upstream failure.
    ///
    /// Successful fetches are cached, including days with no entries. Failures
    /// are not cached so the next call retries.
    pub async fn load(&self, date: NaiveDate, bypass_cache: bool) -> Result<ScoreMap> {
        let key = self.cache.keys().day(date);

        if !bypass_cache {
            if let Some(scores) = self.cache.read::<ScoreMap>(&key).await {
                return Ok(scores);
            }
        }

        let document = self.source.daily(date).await?;
        if let Some(reported) = document.date() {
            debug!(%date, reported, "daily document date");
        }

        let scores = ScoreMap::from_ranked(document.repositories());
        info!(%date, repos = scores.len(), "fetched daily activity");

        self.cache.write(&key, &scores, self.ttl_for(date)).await;
        Ok(scores)
    }

    /// Past days are settled; today's list still grows.
    fn ttl_for(&self, date: NaiveDate) -> Duration {
        if date < Utc::now().date_naive() {
            self.closed_day_ttl
        } else {
            self.open_day_ttl
        }
    }
}
