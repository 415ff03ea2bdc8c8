use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which article table a pool operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolVariant {
    Raw,
    Rewritten,
}

impl PoolVariant {
    pub fn table(self) -> &'static str {
        match self {
            PoolVariant::Raw => "hot_article",
            PoolVariant::Rewritten => "hot_article_rewritten",
        }
    }
}

/// Content lifecycle of a pooled article.
///
/// The status does not record whether a lexicon was actually loaded. An
/// article ingested while screening was unavailable is stored as `Screened`
/// so the pool keeps flowing; the ingest report carries `performed = false`
/// and a warning is logged for it. Editing such a row through `update` once
/// a lexicon is loaded screens it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    /// Passed screening, or stored while no lexicon was loaded.
    Screened,
    Rejected,
    Published,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Screened => "screened",
            ArticleStatus::Rejected => "rejected",
            ArticleStatus::Published => "published",
        }
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArticleStatus::Draft),
            "screened" => Ok(ArticleStatus::Screened),
            "rejected" => Ok(ArticleStatus::Rejected),
            "published" => Ok(ArticleStatus::Published),
            other => Err(format!("Unknown article status: {}", other)),
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Free,
    Claimed,
    Done,
}

impl AllocationStatus {
    pub fn code(self) -> i64 {
        match self {
            AllocationStatus::Free => 0,
            AllocationStatus::Claimed => 1,
            AllocationStatus::Done => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AllocationStatus::Free),
            1 => Some(AllocationStatus::Claimed),
            2 => Some(AllocationStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub task_id: i64,
    pub category_id: i64,
    pub title: String,
    pub pic: Option<String>,
    pub content: String,
    pub source_url: Option<String>,
    pub quality_score: Option<f64>,
    pub status: ArticleStatus,
    pub published_count: i64,
    pub last_publish_time: Option<DateTime<Utc>>,
    pub allocation_status: AllocationStatus,
    pub locked_by_user_id: Option<String>,
    pub locked_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// The current holder, only while the row is claimed.
    pub fn holder(&self) -> Option<&str> {
        match self.allocation_status {
            AllocationStatus::Claimed => self.locked_by_user_id.as_deref(),
            _ => None,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>, lease_ttl: chrono::Duration) -> bool {
        match (self.allocation_status, self.locked_time) {
            (AllocationStatus::Claimed, Some(locked)) => now - locked > lease_ttl,
            // A claimed row without a lock time violates the lease invariant; treat as expired
            (AllocationStatus::Claimed, None) => true,
            _ => false,
        }
    }

    /// Plain-text preview of the content for listings.
    pub fn summary(&self, max_chars: usize) -> String {
        let text = crate::normalizer::strip_html(&self.content);
        if text.chars().count() > max_chars {
            let cut: String = text.chars().take(max_chars).collect();
            format!("{}...", cut)
        } else {
            text
        }
    }
}

/// Fields supplied when a new article enters the pool.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub source_id: i64,
    pub task_id: i64,
    pub category_id: i64,
    pub title: String,
    pub pic: Option<String>,
    pub content: String,
    pub source_url: Option<String>,
    pub quality_score: Option<f64>,
    pub status: Option<ArticleStatus>,
}

/// Constraints a claimable row must satisfy besides being free or expired.
#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub category_id: Option<i64>,
    pub status: Option<ArticleStatus>,
    pub require_title: bool,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            category_id: None,
            status: Some(ArticleStatus::Screened),
            require_title: true,
        }
    }
}

/// The allocation columns a conditional update compares against.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationGuard {
    pub status: AllocationStatus,
    pub locked_by_user_id: Option<String>,
    pub locked_time: Option<DateTime<Utc>>,
}

impl AllocationGuard {
    pub fn of(article: &Article) -> Self {
        Self {
            status: article.allocation_status,
            locked_by_user_id: article.locked_by_user_id.clone(),
            locked_time: article.locked_time,
        }
    }
}

/// New allocation state written by a successful conditional update.
#[derive(Debug, Clone)]
pub enum AllocationChange {
    Claim { user_id: String, at: DateTime<Utc> },
    Renew { at: DateTime<Utc> },
    Free { at: DateTime<Utc> },
    Consume { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Consumed,
    Requeue,
}

impl FromStr for ReleaseOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "consumed" | "done" | "published" => Ok(ReleaseOutcome::Consumed),
            "requeue" | "free" => Ok(ReleaseOutcome::Requeue),
            other => Err(format!("Unknown release outcome: {}", other)),
        }
    }
}
