// Score maps.
// Repository id to integer weight, kept sorted by score so cached payloads are pre-sorted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// One repository's score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub repo: String,
    pub score: u64,
}

/// Repository scores for one window, highest first.
///
/// Keys are lowercase `owner/repo` and unique. Serializes as a JSON array so the
/// order survives a round trip through the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreMap {
    entries: Vec<ScoreEntry>,
}

impl ScoreMap {
    /// Score repositories listed most-active first: position `i` of `T` gets `T - i`.
    /// Ids are lowercased; a repeated id keeps its first (highest) score.
    pub fn from_ranked<I, S>(ranked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ranked
            .into_iter()
            .map(|id| id.as_ref().trim().to_lowercase())
            .collect();
        let total = ids.len() as u64;

        let mut seen = HashSet::new();
        let entries = ids
            .into_iter()
            .enumerate()
            .filter(|(_, repo)| seen.insert(repo.clone()))
            .map(|(i, repo)| ScoreEntry {
                repo,
                score: total - i as u64,
            })
            .collect();

        let mut map = Self { entries };
        map.sort();
        map
    }

    /// Build from accumulated totals. Ties are broken by repository id so the
    /// result does not depend on accumulation order.
    pub fn from_totals(totals: HashMap<String, u64>) -> Self {
        let mut entries: Vec<ScoreEntry> = totals
            .into_iter()
            .map(|(repo, score)| ScoreEntry { repo, score })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.repo.cmp(&b.repo)));
        Self { entries }
    }

    /// Stable sort by score, highest first.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| b.score.cmp(&a.score));
    }

    /// Keep at most `limit` entries.
    pub fn truncate(&mut self, limit: Option<usize>) {
        if let Some(limit) = limit {
            self.entries.truncate(limit);
        }
    }

    /// A copy holding at most `limit` entries.
    pub fn limited(&self, limit: Option<usize>) -> Self {
        let take = limit.unwrap_or(self.entries.len());
        Self {
            entries: self.entries.iter().take(take).cloned().collect(),
        }
    }

    /// Up to `len` entries starting at `offset`.
    pub fn page(&self, offset: usize, len: usize) -> Self {
        Self {
            entries: self.entries.iter().skip(offset).take(len).cloned().collect(),
        }
    }

    /// Score of `repo`, 0 when absent.
    pub fn get(&self, repo: &str) -> u64 {
        self.entries
            .iter()
            .find(|entry| entry.repo == repo)
            .map_or(0, |entry| entry.score)
    }

    /// Add every score into `totals`.
    pub fn accumulate_into(&self, totals: &mut HashMap<String, u64>) {
        for entry in &self.entries {
            *totals.entry(entry.repo.clone()).or_default() += entry.score;
        }
    }

    pub fn entries(&self) -> &[ScoreEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoreEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_inversion() {
        let map = ScoreMap::from_ranked(["a/b", "c/d"]);
        assert_eq!(map.get("a/b"), 2);
        assert_eq!(map.get("c/d"), 1);
        assert_eq!(map.get("missing/repo"), 0);
    }

    #[test]
    fn test_ids_are_lowercased_and_deduplicated() {
        let map = ScoreMap::from_ranked(["Rust-Lang/Rust", "x/y", "rust-lang/rust"]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("rust-lang/rust"), 3);
        assert_eq!(map.get("x/y"), 2);
    }

    #[test]
    fn test_limit_is_prefix_of_unlimited() {
        let map = ScoreMap::from_ranked((0..10).map(|i| format!("o/r{i}")));
        let limited = map.limited(Some(3));

        assert_eq!(limited.entries(), &map.entries()[..3]);
        assert_eq!(map.limited(None), map);
        assert_eq!(map.limited(Some(50)), map);

        let mut truncated = map.clone();
        truncated.truncate(Some(3));
        assert_eq!(truncated, limited);
    }

    #[test]
    fn test_page() {
        let map = ScoreMap::from_ranked(["a/a", "b/b", "c/c", "d/d"]);
        assert_eq!(map.page(1, 2).entries(), &map.entries()[1..3]);
        assert_eq!(map.page(3, 5).len(), 1);
        assert!(map.page(9, 1).is_empty());
    }

    #[test]
    fn test_totals_order_is_deterministic() {
        let mut forward = HashMap::new();
        ScoreMap::from_ranked(["a/a", "b/b"]).accumulate_into(&mut forward);
        ScoreMap::from_ranked(["b/b", "a/a", "c/c"]).accumulate_into(&mut forward);

        let mut backward = HashMap::new();
        ScoreMap::from_ranked(["b/b", "a/a", "c/c"]).accumulate_into(&mut backward);
        ScoreMap::from_ranked(["a/a", "b/b"]).accumulate_into(&mut backward);

        let a = ScoreMap::from_totals(forward);
        let b = ScoreMap::from_totals(backward);
        assert_eq!(a, b);
        // a/a = 2 + 2, b/b = 1 + 3: tie broken by id
        assert_eq!(a.entries()[0].repo, "a/a");
        assert_eq!(a.entries()[1].repo, "b/b");
        assert_eq!(a.get("c/c"), 1);
    }

    #[test]
    fn test_serializes_as_ordered_array() {
        let map = ScoreMap::from_ranked(["z/z", "a/a"]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[{"repo":"z/z","score":2},{"repo":"a/a","score":1}]"#);

        let back: ScoreMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
