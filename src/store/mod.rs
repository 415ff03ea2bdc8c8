pub mod sqlite;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{
    AllocationChange, AllocationGuard, Article, ArticleFilter, ArticleStatus, FetchedHotItem,
    HotPushConfig, HotPushHistory, HotRawItem, NewArticle, NewPushConfig, PoolVariant, PushStatus,
};

pub use sqlite::SqliteStore;

/// Content columns an update may rewrite. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub pic: Option<String>,
    pub status: Option<ArticleStatus>,
}

pub trait ArticlePool {
    fn insert_article(
        &self,
        variant: PoolVariant,
        article: &NewArticle,
        now: DateTime<Utc>,
    ) -> Result<i64>;
    fn get_article(&self, variant: PoolVariant, id: i64) -> Result<Option<Article>>;

    /// Free rows plus claimed rows locked before `expired_before`, oldest first.
    fn find_claimable(
        &self,
        variant: PoolVariant,
        filter: &ArticleFilter,
        expired_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Article>>;
    fn find_expired_claims(
        &self,
        variant: PoolVariant,
        expired_before: DateTime<Utc>,
    ) -> Result<Vec<Article>>;

    /// Apply `change` only if the row still matches `expected`. Returns
    /// whether this call won.
    fn compare_and_set_allocation(
        &self,
        variant: PoolVariant,
        id: i64,
        expected: &AllocationGuard,
        change: &AllocationChange,
    ) -> Result<bool>;

    /// Free rows, newest first.
    fn list_available(
        &self,
        variant: PoolVariant,
        filter: &ArticleFilter,
        limit: usize,
    ) -> Result<Vec<Article>>;

    /// Rewrite content of a row that was never published. Returns false when
    /// the row is missing or already published.
    fn update_unpublished(
        &self,
        variant: PoolVariant,
        id: i64,
        update: &ArticleUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

pub trait HotItemStore {
    // Raw items
    fn insert_hot_items(
        &self,
        source: &str,
        items: &[FetchedHotItem],
        fetched_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<HotRawItem>>;
    fn recent_hot_items(&self, sources: &[String], since: DateTime<Utc>)
        -> Result<Vec<HotRawItem>>;
    fn prune_hot_items_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // Push configs
    fn add_push_config(&self, config: &NewPushConfig, now: DateTime<Utc>) -> Result<i64>;
    fn get_push_config(&self, category_code: &str) -> Result<Option<HotPushConfig>>;
    fn list_push_configs(&self, active_only: bool) -> Result<Vec<HotPushConfig>>;
    fn set_push_keywords(
        &self,
        category_code: &str,
        include: &[String],
        exclude: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool>;
    fn set_push_active(&self, category_code: &str, active: bool, now: DateTime<Utc>)
        -> Result<bool>;

    // Push history
    fn record_push_history(
        &self,
        config_id: i64,
        pushed_at: DateTime<Utc>,
        item_ids: &[i64],
        status: PushStatus,
        error_msg: Option<&str>,
    ) -> Result<i64>;
    /// Ids delivered by successful or partial pushes since `since`.
    fn pushed_item_ids(&self, config_id: i64, since: DateTime<Utc>) -> Result<HashSet<i64>>;
    fn push_history(&self, config_id: i64, limit: usize) -> Result<Vec<HotPushHistory>>;
}
