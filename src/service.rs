// Ranking service.
// Resolves a requested window, applies the daily refresh rule and enriches the ranked entries.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::{CacheConfig, RefreshConfig};
use crate::enrich::{EnrichOptions, EnrichedEntry, Enricher};
use crate::error::Result;
use crate::rank::{ScoreMap, WindowAggregator, WindowKind, WindowScores, WindowSpan, should_force_refresh};
use crate::upstream::RepositoryMetadata;

/// Path segments understood by [`Target::parse`].
pub const ACCEPTED_FORMATS: &[&str] = &["YYYY-MM-DD", "YYYY-Www", "YYYY-MM", "day", "week", "month"];

/// What a ranking request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The rolling list of a window kind ending today.
    Latest(WindowKind),
    /// A fixed calendar day, ISO week or month.
    Span(WindowSpan),
}

impl Target {
    /// Parse a URL segment: `day`, `week`, `month`, `YYYY-MM-DD`, `YYYY-Www` or `YYYY-MM`.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "day" => return Some(Self::Latest(WindowKind::Day)),
            "week" => return Some(Self::Latest(WindowKind::Week)),
            "month" => return Some(Self::Latest(WindowKind::Month)),
            _ => {}
        }

        if let Some((year, week)) = segment.split_once("-W") {
            let week = digits(week, 1..=2)?;
            return WindowSpan::iso_week(digits(year, 4..=4)? as i32, week).map(Self::Span);
        }

        let parts: Vec<&str> = segment.split('-').collect();
        match parts.as_slice() {
            [year, month] => {
                WindowSpan::calendar_month(digits(year, 4..=4)? as i32, digits(month, 2..=2)?)
                    .map(Self::Span)
            }
            [year, month, day] => NaiveDate::from_ymd_opt(
                digits(year, 4..=4)? as i32,
                digits(month, 2..=2)?,
                digits(day, 2..=2)?,
            )
            .map(|date| Self::Span(WindowSpan::day(date))),
            _ => None,
        }
    }
}

fn digits(s: &str, len: std::ops::RangeInclusive<usize>) -> Option<u32> {
    if !len.contains(&s.len()) || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RankingOptions {
    pub limit: Option<NonZeroUsize>,
    pub bypass_cache: bool,
    pub include_errors: bool,
    pub enrich: bool,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            limit: None,
            bypass_cache: false,
            include_errors: false,
            enrich: true,
        }
    }
}

/// One ranked repository in a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub repo: String,
    pub score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<RepositoryMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RankedEntry {
    fn enriched(repo: String, entry: EnrichedEntry) -> Self {
        Self {
            repo,
            score: entry.score,
            info: entry.info,
            error: entry.error,
        }
    }
}

/// Response body of a ranking request.
#[derive(Debug, Clone, Serialize)]
pub struct RankingResponse {
    pub window: String,
    pub kind: WindowKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub failed_dates: Vec<NaiveDate>,
    pub entries: Vec<RankedEntry>,
}

/// A computed window plus when it was computed. Cached as the rolling list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankedList {
    generated_at: DateTime<Utc>,
    span: WindowSpan,
    window: WindowScores,
}

/// Front door for ranking requests.
pub struct Rankings {
    cache: Cache,
    windows: WindowAggregator,
    enricher: Enricher,
    refresh: RefreshConfig,
    latest_ttl: Duration,
    enrichment_ttl: Duration,
}

impl Rankings {
    pub fn new(
        cache: Cache,
        windows: WindowAggregator,
        enricher: Enricher,
        config: &CacheConfig,
        refresh: RefreshConfig,
    ) -> Self {
        Self {
            cache,
            windows,
            enricher,
            refresh,
            latest_ttl: config.latest_ttl(),
            enrichment_ttl: config.enrichment_ttl(),
        }
    }

    pub async fn rank(&self, target: &Target, options: &RankingOptions) -> Result<RankingResponse> {
        self.rank_at(target, options, Utc::now()).await
    }

    /// Like [`rank`](Self::rank) with an explicit clock.
    pub async fn rank_at(
        &self,
        target: &Target,
        options: &RankingOptions,
        now: DateTime<Utc>,
    ) -> Result<RankingResponse> {
        let list = match target {
            Target::Latest(kind) => self.latest(*kind, options.bypass_cache, now).await,
            Target::Span(span) => RankedList {
                generated_at: now,
                span: span.clone(),
                window: self.span_scores(span, options.bypass_cache).await,
            },
        };

        let entries = if options.enrich {
            self.enrich_entries(&list.window.scores, list.span.kind, options)
                .await?
        } else {
            let limit = options.limit.map(NonZeroUsize::get);
            list.window
                .scores
                .limited(limit)
                .iter()
                .map(|entry| RankedEntry {
                    repo: entry.repo.clone(),
                    score: entry.score,
                    info: None,
                    error: None,
                })
                .collect()
        };

        Ok(RankingResponse {
            window: list.span.identifier,
            kind: list.span.kind,
            start: list.span.start,
            end: list.span.end,
            generated_at: list.generated_at,
            failed_dates: list.window.failed_dates,
            entries,
        })
    }

    /// The rolling list, regenerated when bypassed, missing, or due for its daily refresh.
    async fn latest(&self, kind: WindowKind, bypass_cache: bool, now: DateTime<Utc>) -> RankedList {
        let key = self.cache.keys().latest(kind);

        if !bypass_cache {
            let marker = self.cache.marker(&key).await;
            if should_force_refresh(now, marker.as_ref(), &self.refresh) {
                info!(kind = kind.as_str(), "daily refresh due, regenerating");
            } else if let Some(list) = self.cache.read::<RankedList>(&key).await {
                return list;
            }
        }

        let span = WindowSpan::rolling(kind, now.date_naive());
        let window = self.windows.compute(&span, bypass_cache).await;
        let list = RankedList {
            generated_at: now,
            span,
            window,
        };
        self.cache
            .write_with_marker(&key, &list, self.latest_ttl, now)
            .await;
        list
    }

    async fn span_scores(&self, span: &WindowSpan, bypass_cache: bool) -> WindowScores {
        match span.kind {
            // the day tier already caches single days
            WindowKind::Day => self.windows.compute(span, bypass_cache).await,
            WindowKind::Week | WindowKind::Month => self.windows.aggregate(span, bypass_cache).await,
        }
    }

    /// Enrich the top of `scores`.
    ///
    /// With a limit and errors excluded, enrichment runs in rounds over the next
    /// unenriched entries until the limit is filled or the scores run out, so
    /// failures do not shrink the result.
    async fn enrich_entries(
        &self,
        scores: &ScoreMap,
        kind: WindowKind,
        options: &RankingOptions,
    ) -> Result<Vec<RankedEntry>> {
        let enrich_options = EnrichOptions {
            ttl: self.enrichment_ttl,
            window_kind: kind,
        };
        let limit = options.limit.map(NonZeroUsize::get);

        let selected = match limit {
            Some(limit) if !options.include_errors => {
                let mut selected = Vec::with_capacity(limit);
                let mut offset = 0;
                while selected.len() < limit && offset < scores.len() {
                    let want = limit - selected.len();
                    let page = scores.page(offset, want);
                    offset += page.len();
                    let enrichment = self.enricher.enrich(&page, &enrich_options).await?;
                    selected.extend(enrichment.select(false, Some(want)));
                    debug!(offset, selected = selected.len(), "enrichment round");
                }
                selected
            }
            _ => self
                .enricher
                .enrich(&scores.limited(limit), &enrich_options)
                .await?
                .select(options.include_errors, limit),
        };

        Ok(selected
            .into_iter()
            .map(|(repo, entry)| RankedEntry::enriched(repo, entry))
            .collect())
    }
}
