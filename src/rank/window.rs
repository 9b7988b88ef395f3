// Window aggregator.
// Sums per-day scores over a week or month; a failed day is skipped, never fatal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::CacheConfig;

use super::{DayAggregator, ScoreMap, WindowKind, WindowSpan};

/// Aggregated scores plus the days that could not be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowScores {
    pub scores: ScoreMap,
    #[serde(default)]
    pub failed_dates: Vec<NaiveDate>,
}

/// Combines day aggregations into week and month rankings.
#[derive(Clone)]
pub struct WindowAggregator {
    days: DayAggregator,
    cache: Cache,
    concurrency: usize,
    window_ttl: Duration,
    open_ttl: Duration,
}

impl WindowAggregator {
    pub fn new(days: DayAggregator, cache: Cache, concurrency: usize, config: &CacheConfig) -> Self {
        Self {
            days,
            cache,
            concurrency: concurrency.max(1),
            window_ttl: config.window_ttl(),
            open_ttl: config.open_day_ttl(),
        }
    }

    pub fn days(&self) -> &DayAggregator {
        &self.days
    }

    /// Summed scores for the `kind.days()` days ending at `anchor`, highest first.
    pub async fn get_window(&self, kind: WindowKind, anchor: NaiveDate) -> ScoreMap {
        self.aggregate(&WindowSpan::rolling(kind, anchor), false)
            .await
            .scores
    }

    /// Aggregate a span, reading and writing the window-level cache.
    pub async fn aggregate(&self, span: &WindowSpan, bypass_cache: bool) -> WindowScores {
        let key = self.cache.keys().aggregation(span.kind, &span.identifier);

        if !bypass_cache {
            if let Some(cached) = self.cache.read::<WindowScores>(&key).await {
                return cached;
            }
        }

        let window = self.compute(span, bypass_cache).await;
        self.cache.write(&key, &window, self.ttl_for(span, &window)).await;
        window
    }

    /// Aggregate a span from the day tier, ignoring the window-level cache read.
    ///
    /// `bypass_days` also skips the day-level cache reads.
    pub async fn compute(&self, span: &WindowSpan, bypass_days: bool) -> WindowScores {
        let dates = span.dates();
        let results: Vec<_> = stream::iter(dates)
            .map(|date| async move { (date, self.days.load(date, bypass_days).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut totals = HashMap::new();
        let mut failed_dates = Vec::new();
        for (date, result) in results {
            match result {
                Ok(scores) => scores.accumulate_into(&mut totals),
                Err(e) => {
                    warn!(%date, window = %span.identifier, error = %e, "skipping day in window");
                    failed_dates.push(date);
                }
            }
        }

        let scores = ScoreMap::from_totals(totals);
        info!(
            kind = span.kind.as_str(),
            window = %span.identifier,
            repos = scores.len(),
            failed = failed_dates.len(),
            "aggregated window"
        );

        WindowScores {
            scores,
            failed_dates,
        }
    }

    /// Windows still open or missing days expire quickly so they fill in.
    fn ttl_for(&self, span: &WindowSpan, window: &WindowScores) -> Duration {
        if !window.failed_dates.is_empty() || span.end >= Utc::now().date_naive() {
            self.open_ttl
        } else {
            self.window_ttl
        }
    }
}
