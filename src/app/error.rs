use thiserror::Error;

use crate::config::ConfigError;
use crate::fetcher::SourceFetchError;

#[derive(Error, Debug)]
pub enum FastfishError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Article not found: {0}")]
    ArticleNotFound(i64),

    #[error("Article {article_id} is locked by {holder}, not {requester}")]
    LockOwnership {
        article_id: i64,
        holder: String,
        requester: String,
    },

    #[error("Article {0} is not claimed")]
    NotClaimed(i64),

    #[error("Allocation state of article {0} changed concurrently")]
    AllocationConflict(i64),

    #[error("Invalid article: {0}")]
    InvalidArticle(String),

    #[error("Article {article_id} already published {published_count} time(s)")]
    ArticleAlreadyPublished {
        article_id: i64,
        published_count: i64,
    },

    #[error("Push config not found: {0}")]
    PushConfigNotFound(String),

    #[error("All {} hot sources failed", .0.len())]
    AllSourcesFailed(Vec<SourceFetchError>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FastfishError>;
