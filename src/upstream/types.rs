// Upstream response types.
// The daily-activity document and the repository metadata returned by the metadata service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StarboardError};

/// One calendar day's activity document, split at the boundary into scalar
/// metadata (`date`, `total`, ...) and rank-indexed repository entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyDocument {
    pub metadata: Map<String, Value>,
    /// `(rank index, repository id)` sorted by index.
    pub entries: Vec<(usize, String)>,
}

impl DailyDocument {
    /// Split a raw upstream payload. Keys made only of ASCII digits are rank
    /// indices; everything else is metadata. Indexed values that are not
    /// `owner/repo` strings are dropped.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(StarboardError::Malformed(
                "daily document is not a JSON object".into(),
            ));
        };

        let mut document = Self::default();
        for (key, value) in object {
            match rank_index(&key) {
                Some(index) => {
                    if let Some(repo) = value.as_str().filter(|r| is_repository_id(r)) {
                        document.entries.push((index, repo.trim().to_string()));
                    }
                }
                None => {
                    document.metadata.insert(key, value);
                }
            }
        }

        document.entries.sort_by_key(|(index, _)| *index);
        Ok(document)
    }

    /// Repository ids in rank order, most active first.
    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, repo)| repo.as_str())
    }

    /// The `date` metadata field, if present.
    pub fn date(&self) -> Option<&str> {
        self.metadata.get("date").and_then(Value::as_str)
    }
}

fn rank_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Whether `id` looks like `owner/repo`.
pub fn is_repository_id(id: &str) -> bool {
    let mut parts = id.trim().split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}

/// Repository owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Repository details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Issue or pull request summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Discussion summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Everything the metadata service returns for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub repository: Repository,
    #[serde(default)]
    pub issues: Vec<IssueSummary>,
    #[serde(default)]
    pub pulls: Vec<IssueSummary>,
    #[serde(default)]
    pub discussions: Vec<DiscussionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_metadata_and_entries() {
        let document = DailyDocument::from_value(json!({
            "0": "a/b",
            "1": "c/d",
            "date": "2025-01-01",
            "total": 2
        }))
        .unwrap();

        assert_eq!(document.date(), Some("2025-01-01"));
        assert_eq!(document.metadata.len(), 2);
        assert_eq!(document.repositories().collect::<Vec<_>>(), ["a/b", "c/d"]);
    }

    #[test]
    fn test_entries_follow_numeric_not_lexical_order() {
        let mut object = Map::new();
        for i in 0..12 {
            object.insert(i.to_string(), json!(format!("owner/repo{i}")));
        }
        let document = DailyDocument::from_value(Value::Object(object)).unwrap();

        let repos: Vec<_> = document.repositories().collect();
        assert_eq!(repos[2], "owner/repo2");
        assert_eq!(repos[10], "owner/repo10");
    }

    #[test]
    fn test_unusable_entries_are_dropped() {
        let document = DailyDocument::from_value(json!({
            "0": "a/b",
            "1": 42,
            "2": "not-a-repo",
            "3": "x/y/z",
            "-4": "e/f",
            "5": "g/h"
        }))
        .unwrap();

        assert_eq!(document.repositories().collect::<Vec<_>>(), ["a/b", "g/h"]);
        assert!(document.metadata.contains_key("-4"));
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = DailyDocument::from_value(json!(["a/b"])).unwrap_err();
        assert!(matches!(err, StarboardError::Malformed(_)));
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let metadata: RepositoryMetadata = serde_json::from_value(json!({
            "repository": { "full_name": "a/b", "stargazers_count": 10 },
            "issues": [{ "number": 1, "title": "Crash on start" }]
        }))
        .unwrap();

        assert_eq!(metadata.repository.stargazers_count, 10);
        assert_eq!(metadata.issues.len(), 1);
        assert!(metadata.pulls.is_empty());
        assert!(metadata.discussions.is_empty());
    }
}
