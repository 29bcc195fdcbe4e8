//! Shared data model: Release, Search Plan, NZB Tree, Triage Decision, and
//! the cache/mount value types described by the system's data model.

use serde::{Deserialize, Serialize};

/// Where a Release was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Aggregator,
    Direct,
    Easynews,
}

/// A single candidate stream, normalized from whichever indexer produced it.
///
/// Identity is `(indexer_id, normalized_title, publish_instant_ms, size)`;
/// immutable once constructed, owned by the request for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub raw_title: String,
    pub download_url: String,
    pub indexer_name: String,
    pub indexer_id: String,
    pub size_bytes: u64,
    pub publish_instant_ms: i64,
    pub age_days: f64,
    pub resolution: String,
    pub languages: Vec<String>,
    pub quality_score: u32,
    pub source_type: SourceType,
    pub payload_token: Option<String>,
}

impl Release {
    pub fn identity(&self) -> (String, String, i64, u64) {
        (
            self.indexer_id.clone(),
            normalize_title(&self.raw_title),
            self.publish_instant_ms,
            self.size_bytes,
        )
    }

    pub fn is_paid(&self, paid_indexer_ids: &[String]) -> bool {
        paid_indexer_ids.contains(&self.indexer_id)
    }
}

/// Lowercase; `._-` become spaces; quotes/brackets/parens stripped;
/// non-alphanumeric dropped; whitespace collapsed. Used for both dedupe
/// grouping and strict-phrase matching.
pub fn normalize_title(title: &str) -> String {
    let mut s = title.to_lowercase();
    for c in ['.', '_', '-'] {
        s = s.replace(c, " ");
    }
    let s: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Movie,
    Series,
    Search,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanTokens {
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// One dispatch unit against the indexer fan-out. Identity is
/// `(plan_type, canonical_query)`; the planner deduplicates on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub plan_type: PlanType,
    pub query: String,
    pub tokens: PlanTokens,
    pub strict_phrase: Option<String>,
    pub ascii_fallback_title: Option<String>,
}

impl SearchPlan {
    pub fn identity(&self) -> (PlanType, String) {
        (self.plan_type, self.query.clone())
    }
}

/// One of the 1..20 ordinal Newznab slots, or the aggregator singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub id: String,
    pub display_name: String,
    pub endpoint: String,
    pub api_path: String,
    pub api_key: String,
    pub enabled: bool,
    pub paid: bool,
    pub dedupe_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbSegment {
    pub number: u32,
    pub bytes: u64,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbFile {
    pub subject: String,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub segments: Vec<NzbSegment>,
}

/// Root of a parsed NZB; read-only once built.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NzbTree {
    pub title: Option<String>,
    pub files: Vec<NzbFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    Verified,
    Unverified,
    Unverified7z,
    Blocked,
    FetchError,
    Error,
    Pending,
    Skipped,
}

impl TriageStatus {
    /// Final statuses never regress per spec §3's monotonicity invariant.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TriageStatus::Verified | TriageStatus::Blocked | TriageStatus::Unverified7z
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageDecision {
    pub download_url: String,
    pub status: TriageStatus,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    pub archive_findings: Vec<String>,
    pub file_count: usize,
    pub source_title: String,
    pub normalized_title: String,
    pub indexer_id: String,
    pub indexer_name: String,
    pub publish_instant_ms: i64,
    pub age_days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MountHandle {
    pub status: MountStatus,
    pub mount_path: Option<String>,
    pub filename: Option<String>,
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_titles_consistently() {
        assert_eq!(
            normalize_title("The.Movie_Name-2024!"),
            normalize_title("the movie name 2024")
        );
    }

    #[test]
    fn final_status_is_closed_under_transition() {
        assert!(TriageStatus::Verified.is_final());
        assert!(TriageStatus::Blocked.is_final());
        assert!(TriageStatus::Unverified7z.is_final());
        assert!(!TriageStatus::Pending.is_final());
        assert!(!TriageStatus::Unverified.is_final());
    }
}
