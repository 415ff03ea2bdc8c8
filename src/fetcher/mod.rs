pub mod http_fetcher;
pub mod parallel;

use async_trait::async_trait;
use thiserror::Error;

use crate::app::Result;
use crate::domain::FetchedHotItem;

pub use http_fetcher::HttpHotSource;
pub use parallel::{FetchReport, FetchRequest, HotIngestScheduler};

/// One source that could not be fetched or parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source_name}: {message}")]
pub struct SourceFetchError {
    pub source_name: String,
    pub message: String,
}

/// Upstream hot-list provider.
#[async_trait]
pub trait HotSource {
    /// Ranked items of one platform, already normalized.
    async fn fetch_source(&self, source: &str) -> Result<Vec<FetchedHotItem>>;

    async fn list_platforms(&self) -> Result<Vec<String>>;
}
