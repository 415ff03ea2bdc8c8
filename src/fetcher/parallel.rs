use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::app::{FastfishError, Result};
use crate::domain::{HotRawItem, KeywordFilter, RecencyWindow};
use crate::fetcher::{HotSource, SourceFetchError};
use crate::store::HotItemStore;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_LIMIT_PER_SOURCE: usize = 20;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Empty means every platform the upstream lists.
    pub sources: Vec<String>,
    pub filter: Option<KeywordFilter>,
    pub limit_per_source: usize,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            filter: None,
            limit_per_source: DEFAULT_LIMIT_PER_SOURCE,
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub attempted: Vec<String>,
    pub inserted: Vec<HotRawItem>,
    /// Items already stored inside the recency window.
    pub duplicates: usize,
    /// Items dropped by the keyword filter.
    pub filtered: usize,
    pub errors: Vec<SourceFetchError>,
}

struct SourceOutcome {
    inserted: Vec<HotRawItem>,
    duplicates: usize,
    filtered: usize,
}

/// Fetches many hot sources concurrently and persists what is new.
pub struct HotIngestScheduler {
    source: Arc<dyn HotSource + Send + Sync>,
    semaphore: Arc<Semaphore>,
    window: RecencyWindow,
}

impl HotIngestScheduler {
    pub fn with_workers(
        source: Arc<dyn HotSource + Send + Sync>,
        window: RecencyWindow,
        workers: usize,
    ) -> Self {
        Self {
            source,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            window,
        }
    }

    pub async fn list_platforms(&self) -> Result<Vec<String>> {
        self.source.list_platforms().await
    }

    /// Fetch every requested source. Per-source failures are collected in
    /// the report; the call fails only when no source succeeded.
    pub async fn fetch<S: HotItemStore + Send + Sync + 'static>(
        &self,
        request: &FetchRequest,
        store: Arc<S>,
        now: DateTime<Utc>,
    ) -> Result<FetchReport> {
        let sources = if request.sources.is_empty() {
            let platforms = self.source.list_platforms().await?;
            info!("Fetching all {} platforms", platforms.len());
            platforms
        } else {
            request.sources.clone()
        };

        let window_start = self.window.start(now);
        let mut handles = Vec::new();

        for name in sources {
            let source = self.source.clone();
            let semaphore = self.semaphore.clone();
            let store = store.clone();
            let request = request.clone();
            let task_name = name.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| FastfishError::Other(e.to_string()))?;

                fetch_single_source(&source, &task_name, &request, &store, now, window_start).await
            });

            handles.push((name, handle));
        }

        let mut report = FetchReport::default();
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Task join error: {}", e);
                    Err(FastfishError::Other(e.to_string()))
                }
            };
            match result {
                Ok(outcome) => {
                    report.duplicates += outcome.duplicates;
                    report.filtered += outcome.filtered;
                    report.inserted.extend(outcome.inserted);
                }
                Err(e) => {
                    warn!("Failed to fetch hot source {}: {}", name, e);
                    report.errors.push(SourceFetchError {
                        source_name: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            report.attempted.push(name);
        }

        if !report.attempted.is_empty() && report.errors.len() == report.attempted.len() {
            return Err(FastfishError::AllSourcesFailed(report.errors));
        }

        info!(
            "Hot fetch finished: {} sources, {} new, {} duplicates, {} filtered, {} errors",
            report.attempted.len(),
            report.inserted.len(),
            report.duplicates,
            report.filtered,
            report.errors.len()
        );

        Ok(report)
    }
}

async fn fetch_single_source<S: HotItemStore>(
    source: &Arc<dyn HotSource + Send + Sync>,
    name: &str,
    request: &FetchRequest,
    store: &Arc<S>,
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
) -> Result<SourceOutcome> {
    let mut items = source.fetch_source(name).await?;
    items.truncate(request.limit_per_source);

    let fetched = items.len();
    if let Some(filter) = &request.filter {
        items.retain(|item| filter.matches(&format!("{} {}", item.title, item.desc)));
    }
    let filtered = fetched - items.len();

    let inserted = store.insert_hot_items(name, &items, now, window_start)?;
    let duplicates = items.len() - inserted.len();
    debug!(
        "Source {}: {} fetched, {} new, {} duplicates",
        name,
        fetched,
        inserted.len(),
        duplicates
    );

    Ok(SourceOutcome {
        inserted,
        duplicates,
        filtered,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::FetchedHotItem;
    use crate::store::SqliteStore;

    struct FakeSource {
        lists: HashMap<String, Vec<FetchedHotItem>>,
    }

    #[async_trait]
    impl HotSource for FakeSource {
        async fn fetch_source(&self, source: &str) -> Result<Vec<FetchedHotItem>> {
            self.lists
                .get(source)
                .cloned()
                .ok_or_else(|| FastfishError::Other(format!("unknown source {}", source)))
        }

        async fn list_platforms(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self.lists.keys().cloned().collect();
            names.sort();
            Ok(names)
        }
    }

    fn item(title: &str, rank: i64) -> FetchedHotItem {
        FetchedHotItem {
            title: title.into(),
            link: format!("https://example.com/{}", rank),
            desc: String::new(),
            hot_score: String::new(),
            rank,
        }
    }

    fn scheduler() -> HotIngestScheduler {
        let mut lists = HashMap::new();
        lists.insert(
            "weibo".to_string(),
            vec![item("婚姻话题", 1), item("股市", 2), item("离婚广告", 3)],
        );
        lists.insert("zhihu".to_string(), vec![item("婚姻问答", 1)]);
        HotIngestScheduler::with_workers(
            Arc::new(FakeSource { lists }),
            RecencyWindow::CalendarDay {
                utc_offset_hours: 8,
            },
            2,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap()
    }

    fn request(sources: &[&str]) -> FetchRequest {
        FetchRequest {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_collects_partial_failures() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let report = scheduler()
            .fetch(&request(&["weibo", "missing"]), store, now())
            .await
            .unwrap();

        assert_eq!(report.inserted.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].source_name, "missing");
    }

    #[tokio::test]
    async fn test_fetch_all_sources_failed() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let err = scheduler()
            .fetch(&request(&["nope", "gone"]), store, now())
            .await
            .unwrap_err();
        match err {
            FastfishError::AllSourcesFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_refetch_within_window_inserts_nothing() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scheduler = scheduler();

        let first = scheduler
            .fetch(&request(&["weibo"]), store.clone(), now())
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 3);

        let second = scheduler
            .fetch(&request(&["weibo"]), store.clone(), now() + Duration::hours(2))
            .await
            .unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.duplicates, 3);

        // Next local day starts at 16:00 UTC
        let next_day = Utc.with_ymd_and_hms(2024, 3, 1, 16, 30, 0).unwrap();
        let third = scheduler
            .fetch(&request(&["weibo"]), store, next_day)
            .await
            .unwrap();
        assert_eq!(third.inserted.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_applies_filter_and_limit() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let request = FetchRequest {
            sources: vec!["weibo".into()],
            filter: Some(KeywordFilter::new(
                vec!["婚".into()],
                vec!["广告".into()],
            )),
            limit_per_source: 3,
        };
        let report = scheduler().fetch(&request, store, now()).await.unwrap();
        assert_eq!(report.inserted.len(), 1);
        assert_eq!(report.inserted[0].title, "婚姻话题");
        assert_eq!(report.filtered, 2);

        let limited = FetchRequest {
            sources: vec!["weibo".into()],
            filter: None,
            limit_per_source: 1,
        };
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let report = scheduler().fetch(&limited, store, now()).await.unwrap();
        assert_eq!(report.inserted.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_sources_fetches_every_platform() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let report = scheduler()
            .fetch(&FetchRequest::default(), store, now())
            .await
            .unwrap();
        assert_eq!(report.attempted, vec!["weibo", "zhihu"]);
        assert_eq!(report.inserted.len(), 4);
    }
}
