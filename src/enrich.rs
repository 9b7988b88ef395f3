// Enrichment engine.
// Merges scores with cached or freshly fetched repository metadata, tracking per-item failures.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::Result;
use crate::rank::{ScoreMap, WindowKind};
use crate::upstream::{MetadataSource, RepositoryMetadata};

/// A scored repository with its metadata or the reason it has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEntry {
    pub score: u64,
    pub info: Option<RepositoryMetadata>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EnrichedEntry {
    pub fn is_success(&self) -> bool {
        self.info.is_some()
    }
}

/// Settings for one enrichment pass.
#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub ttl: Duration,
    pub window_kind: WindowKind,
}

/// Enrichment results in score order, one per input repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    entries: Vec<(String, EnrichedEntry)>,
}

impl Enrichment {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, repo: &str) -> Option<&EnrichedEntry> {
        self.entries
            .iter()
            .find(|(name, _)| name == repo)
            .map(|(_, entry)| entry)
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, e)| !e.is_success()).count()
    }

    pub fn entries(&self) -> &[(String, EnrichedEntry)] {
        &self.entries
    }

    /// Drop failed entries unless `include_errors`, then keep at most `limit`.
    pub fn select(self, include_errors: bool, limit: Option<usize>) -> Vec<(String, EnrichedEntry)> {
        let kept = self
            .entries
            .into_iter()
            .filter(|(_, entry)| include_errors || entry.is_success());
        match limit {
            Some(limit) => kept.take(limit).collect(),
            None => kept.collect(),
        }
    }
}

/// Looks up metadata for scored repositories, one cache tier per window kind.
#[derive(Clone)]
pub struct Enricher {
    source: Arc<dyn MetadataSource>,
    cache: Cache,
}

impl Enricher {
    pub fn new(source: Arc<dyn MetadataSource>, cache: Cache) -> Self {
        Self { source, cache }
    }

    /// Enrich every repository in `scores`.
    ///
    /// Cache hits take the current score. Misses are fetched in one batch;
    /// successes are cached, failures are reported inline and not cached. Only
    /// configuration errors are returned as `Err`.
    pub async fn enrich(&self, scores: &ScoreMap, options: &EnrichOptions) -> Result<Enrichment> {
        let keys: Vec<String> = scores
            .iter()
            .map(|entry| self.cache.keys().enrichment(options.window_kind, &entry.repo))
            .collect();

        let cached: Vec<Option<EnrichedEntry>> =
            join_all(keys.iter().map(|key| self.cache.read::<EnrichedEntry>(key))).await;

        let mut slots: Vec<Option<EnrichedEntry>> = Vec::with_capacity(cached.len());
        let mut misses = Vec::new();
        for (i, (entry, hit)) in scores.iter().zip(cached).enumerate() {
            match hit.filter(EnrichedEntry::is_success) {
                Some(hit) => slots.push(Some(EnrichedEntry {
                    score: entry.score,
                    ..hit
                })),
                None => {
                    slots.push(None);
                    misses.push(i);
                }
            }
        }

        if !misses.is_empty() {
            let repos: Vec<String> = misses
                .iter()
                .map(|&i| scores.entries()[i].repo.clone())
                .collect();
            let outcomes = self.source.fetch_batch(&repos).await?;

            let mut writes = Vec::new();
            for (n, &i) in misses.iter().enumerate() {
                let score = scores.entries()[i].score;
                let entry = match outcomes.get(n) {
                    Some(Ok(info)) => {
                        let entry = EnrichedEntry {
                            score,
                            info: Some(info.clone()),
                            error: None,
                        };
                        writes.push((i, entry.clone()));
                        entry
                    }
                    Some(Err(error)) => {
                        warn!(repo = %repos[n], error = %error, "metadata fetch failed");
                        EnrichedEntry {
                            score,
                            info: None,
                            error: Some(error.clone()),
                        }
                    }
                    None => EnrichedEntry {
                        score,
                        info: None,
                        error: Some("no result returned".into()),
                    },
                };
                slots[i] = Some(entry);
            }

            join_all(
                writes
                    .iter()
                    .map(|(i, entry)| self.cache.write(&keys[*i], entry, options.ttl)),
            )
            .await;
        }

        let entries: Vec<(String, EnrichedEntry)> = scores
            .iter()
            .zip(slots)
            .filter_map(|(score, slot)| slot.map(|entry| (score.repo.clone(), entry)))
            .collect();

        let enrichment = Enrichment { entries };
        info!(
            repos = enrichment.len(),
            fetched = misses.len(),
            failed = enrichment.failures(),
            "enrichment finished"
        );
        Ok(enrichment)
    }
}
