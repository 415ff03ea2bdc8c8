use std::path::PathBuf;
use std::sync::Arc;

use crate::allocation::AllocationManager;
use crate::app::error::Result;
use crate::articles::ArticleIngestor;
use crate::config::Config;
use crate::fetcher::{HotIngestScheduler, HotSource, HttpHotSource};
use crate::lexicon::LexiconHandle;
use crate::push::{HttpNotifier, Notifier, PushDedupEngine};
use crate::store::sqlite::SqliteStore;

/// Everything a command or the daemon needs, wired from one `Config`.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub lexicon: Arc<LexiconHandle>,
    pub allocation: AllocationManager<SqliteStore>,
    pub articles: ArticleIngestor<SqliteStore>,
    pub scheduler: HotIngestScheduler,
    pub push: PushDedupEngine<SqliteStore>,
}

impl AppContext {
    /// `db_path` and `workers` override the configured values.
    pub fn new(config: Config, db_path: Option<PathBuf>, workers: Option<usize>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => config.db_path()?,
        };
        let store = Arc::new(SqliteStore::new(&db_path)?);
        Self::assemble(config, store, workers)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::assemble(config, store, None)
    }

    fn assemble(config: Config, store: Arc<SqliteStore>, workers: Option<usize>) -> Result<Self> {
        let lexicon = Arc::new(LexiconHandle::load(config.lexicon_dir()?));
        let source: Arc<dyn HotSource + Send + Sync> = Arc::new(HttpHotSource::new(
            &config.hot.api_base,
            config.hot.request_timeout(),
        )?);
        let notifier: Arc<dyn Notifier + Send + Sync> = Arc::new(HttpNotifier::new(
            config.push.timeout(),
            &config.push.telegram_api_base,
            config.push.telegram_bot_token.clone(),
        )?);

        let allocation = AllocationManager::new(store.clone(), config.allocation.lease_ttl());
        let articles =
            ArticleIngestor::new(store.clone(), lexicon.clone(), config.lexicon.policy()?);
        let scheduler = HotIngestScheduler::with_workers(
            source,
            config.hot.recency_window()?,
            workers.unwrap_or(config.hot.workers),
        );
        let push = PushDedupEngine::new(store.clone(), notifier, config.push_settings()?);

        Ok(Self {
            config,
            store,
            lexicon,
            allocation,
            articles,
            scheduler,
            push,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_context_with_missing_lexicon() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.lexicon.dir = Some(dir.path().join("absent"));

        let ctx = AppContext::in_memory(config).unwrap();
        assert!(!ctx.lexicon.snapshot().is_screening());
        assert_eq!(ctx.allocation.lease_ttl(), chrono::Duration::seconds(600));
    }

    #[test]
    fn test_file_context_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("fastfish.db");
        let mut config = Config::default();
        config.lexicon.dir = Some(dir.path().to_path_buf());

        AppContext::new(config, Some(db.clone()), Some(2)).unwrap();
        assert!(db.exists());
    }
}
