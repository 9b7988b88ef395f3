// Cache key scheme.
// Versioned keys for aggregation and enrichment tiers, plus their on-disk file names.

use std::path::PathBuf;

use chrono::NaiveDate;
use directories::ProjectDirs;

use crate::rank::WindowKind;

/// Suffix of the marker key stored next to a guarded list.
const MARKER_SUFFIX: &str = ":refreshed";

/// Builds cache keys for one schema version.
///
/// Aggregation results use `{version}-{kind}-{identifier}`, enrichment results use
/// `{version}:{entity}:{kind}:{repo}`. Changing the version orphans every old entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    version: String,
}

impl CacheKeys {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Key for one calendar day's score map.
    pub fn day(&self, date: NaiveDate) -> String {
        self.aggregation(WindowKind::Day, &date.format("%Y-%m-%d").to_string())
    }

    /// Key for an aggregated window, e.g. `v3-week-2025-W01`.
    pub fn aggregation(&self, kind: WindowKind, identifier: &str) -> String {
        format!("{}-{}-{}", self.version, kind.as_str(), identifier)
    }

    /// Key for the rolling "latest" list of a window kind.
    pub fn latest(&self, kind: WindowKind) -> String {
        self.aggregation(kind, "latest")
    }

    /// Key for a repository's enrichment within a window kind.
    pub fn enrichment(&self, kind: WindowKind, repo: &str) -> String {
        format!("{}:repo:{}:{}", self.version, kind.as_str(), repo)
    }

    /// Key of the refresh marker guarding `key`.
    pub fn marker(key: &str) -> String {
        format!("{key}{MARKER_SUFFIX}")
    }
}

/// Get the base cache directory (~/.cache/starboard on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "starboard").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// File name for a key. Characters that are unsafe in paths are percent-escaped
/// so distinct keys never share a file.
pub fn file_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 5);
    for c in key.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' => {
                name.push_str(&format!("%{:02X}", c as u32));
            }
            _ => name.push(c),
        }
    }
    name.push_str(".json");
    name
}
