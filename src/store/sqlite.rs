use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{FastfishError, Result};
use crate::domain::{
    AllocationChange, AllocationGuard, AllocationStatus, Article, ArticleFilter, ArticleStatus,
    FetchedHotItem, HotPushConfig, HotPushHistory, HotRawItem, NewArticle, NewPushConfig,
    PoolVariant, PushStatus,
};
use crate::store::{ArticlePool, ArticleUpdate, HotItemStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ARTICLE_COLUMNS: &str = "id, source_id, task_id, category_id, title, pic, content, \
     source_url, quality_score, status, published_count, last_publish_time, \
     allocation_status, locked_by_user_id, locked_time, create_time, update_time";

const HOT_ITEM_COLUMNS: &str = "id, source, title, link, desc_text, hot, rank, fetched_at";

const PUSH_CONFIG_COLUMNS: &str = "id, category_code, category_name, sources, \
     include_keywords, exclude_keywords, push_time, channel, webhook, max_items, is_active";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a file database shared with other processes (WAL, busy timeout).
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| FastfishError::Other(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            FastfishError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        source_id: row.get(1)?,
        task_id: row.get(2)?,
        category_id: row.get(3)?,
        title: row.get(4)?,
        pic: row.get(5)?,
        content: row.get(6)?,
        source_url: row.get(7)?,
        quality_score: row.get(8)?,
        status: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or(ArticleStatus::Draft),
        published_count: row.get(10)?,
        last_publish_time: row.get::<_, Option<i64>>(11)?.map(from_ts),
        // Unknown codes are never handed out
        allocation_status: AllocationStatus::from_code(row.get(12)?)
            .unwrap_or(AllocationStatus::Done),
        locked_by_user_id: row.get(13)?,
        locked_time: row.get::<_, Option<i64>>(14)?.map(from_ts),
        created_at: from_ts(row.get(15)?),
        updated_at: from_ts(row.get(16)?),
    })
}

fn hot_item_from_row(row: &Row<'_>) -> rusqlite::Result<HotRawItem> {
    Ok(HotRawItem {
        id: row.get(0)?,
        source: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        desc: row.get(4)?,
        hot_score: row.get(5)?,
        rank: row.get(6)?,
        fetched_at: from_ts(row.get(7)?),
    })
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn push_config_from_row(row: &Row<'_>) -> rusqlite::Result<HotPushConfig> {
    Ok(HotPushConfig {
        id: row.get(0)?,
        category_code: row.get(1)?,
        category_name: row.get(2)?,
        sources: json_list(&row.get::<_, String>(3)?),
        include_keywords: json_list(&row.get::<_, String>(4)?),
        exclude_keywords: json_list(&row.get::<_, String>(5)?),
        push_time: row.get(6)?,
        channel: row.get(7)?,
        webhook: row.get(8)?,
        max_items: row.get::<_, i64>(9)?.max(0) as usize,
        is_active: row.get(10)?,
    })
}

impl ArticlePool for SqliteStore {
    fn insert_article(
        &self,
        variant: PoolVariant,
        article: &NewArticle,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let status = article.status.unwrap_or(ArticleStatus::Draft);

        conn.execute(
            &format!(
                "INSERT INTO {} (source_id, task_id, category_id, title, pic, content, source_url,
                     quality_score, status, allocation_status, create_time, update_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                variant.table()
            ),
            params![
                article.source_id,
                article.task_id,
                article.category_id,
                article.title,
                article.pic,
                article.content,
                article.source_url,
                article.quality_score,
                status.as_str(),
                AllocationStatus::Free.code(),
                to_ts(now)
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_article(&self, variant: PoolVariant, id: i64) -> Result<Option<Article>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    ARTICLE_COLUMNS,
                    variant.table()
                ),
                params![id],
                article_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn find_claimable(
        &self,
        variant: PoolVariant,
        filter: &ArticleFilter,
        expired_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}
             WHERE (allocation_status = ?1
                    OR (allocation_status = ?2 AND (locked_time IS NULL OR locked_time < ?3)))
               AND (?4 IS NULL OR category_id = ?4)
               AND (?5 IS NULL OR status = ?5)
               AND (?6 = 0 OR TRIM(title) != '')
             ORDER BY create_time ASC, id ASC
             LIMIT ?7",
            ARTICLE_COLUMNS,
            variant.table()
        ))?;

        let articles = stmt
            .query_map(
                params![
                    AllocationStatus::Free.code(),
                    AllocationStatus::Claimed.code(),
                    to_ts(expired_before),
                    filter.category_id,
                    filter.status.map(|s| s.as_str()),
                    filter.require_title,
                    limit as i64
                ],
                article_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    fn find_expired_claims(
        &self,
        variant: PoolVariant,
        expired_before: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}
             WHERE allocation_status = ?1 AND (locked_time IS NULL OR locked_time < ?2)
             ORDER BY id ASC",
            ARTICLE_COLUMNS,
            variant.table()
        ))?;

        let articles = stmt
            .query_map(
                params![AllocationStatus::Claimed.code(), to_ts(expired_before)],
                article_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    fn compare_and_set_allocation(
        &self,
        variant: PoolVariant,
        id: i64,
        expected: &AllocationGuard,
        change: &AllocationChange,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let table = variant.table();
        let guard = "WHERE id = ?1 AND allocation_status = ?2
                       AND locked_by_user_id IS ?3 AND locked_time IS ?4";
        let expected_status = expected.status.code();
        let expected_holder = expected.locked_by_user_id.as_deref();
        let expected_time = expected.locked_time.map(to_ts);

        let updated = match change {
            AllocationChange::Claim { user_id, at } => conn.execute(
                &format!(
                    "UPDATE {} SET allocation_status = ?5, locked_by_user_id = ?6,
                         locked_time = ?7, update_time = ?7 {}",
                    table, guard
                ),
                params![
                    id,
                    expected_status,
                    expected_holder,
                    expected_time,
                    AllocationStatus::Claimed.code(),
                    user_id,
                    to_ts(*at)
                ],
            )?,
            AllocationChange::Renew { at } => conn.execute(
                &format!(
                    "UPDATE {} SET locked_time = ?5, update_time = ?5 {}",
                    table, guard
                ),
                params![id, expected_status, expected_holder, expected_time, to_ts(*at)],
            )?,
            AllocationChange::Free { at } => conn.execute(
                &format!(
                    "UPDATE {} SET allocation_status = ?5, locked_by_user_id = NULL,
                         locked_time = NULL, update_time = ?6 {}",
                    table, guard
                ),
                params![
                    id,
                    expected_status,
                    expected_holder,
                    expected_time,
                    AllocationStatus::Free.code(),
                    to_ts(*at)
                ],
            )?,
            AllocationChange::Consume { at } => conn.execute(
                &format!(
                    "UPDATE {} SET allocation_status = ?5, locked_by_user_id = NULL,
                         locked_time = NULL, status = ?6,
                         published_count = published_count + 1,
                         last_publish_time = ?7, update_time = ?7 {}",
                    table, guard
                ),
                params![
                    id,
                    expected_status,
                    expected_holder,
                    expected_time,
                    AllocationStatus::Done.code(),
                    ArticleStatus::Published.as_str(),
                    to_ts(*at)
                ],
            )?,
        };

        Ok(updated == 1)
    }

    fn list_available(
        &self,
        variant: PoolVariant,
        filter: &ArticleFilter,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}
             WHERE allocation_status = ?1
               AND (?2 IS NULL OR category_id = ?2)
               AND (?3 IS NULL OR status = ?3)
               AND (?4 = 0 OR TRIM(title) != '')
             ORDER BY create_time DESC, id DESC
             LIMIT ?5",
            ARTICLE_COLUMNS,
            variant.table()
        ))?;

        let articles = stmt
            .query_map(
                params![
                    AllocationStatus::Free.code(),
                    filter.category_id,
                    filter.status.map(|s| s.as_str()),
                    filter.require_title,
                    limit as i64
                ],
                article_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    fn update_unpublished(
        &self,
        variant: PoolVariant,
        id: i64,
        update: &ArticleUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;

        let updated = conn.execute(
            &format!(
                "UPDATE {} SET
                     title = COALESCE(?2, title),
                     content = COALESCE(?3, content),
                     pic = COALESCE(?4, pic),
                     status = COALESCE(?5, status),
                     update_time = ?6
                 WHERE id = ?1 AND published_count = 0",
                variant.table()
            ),
            params![
                id,
                update.title,
                update.content,
                update.pic,
                update.status.map(|s| s.as_str()),
                to_ts(now)
            ],
        )?;

        Ok(updated == 1)
    }
}

impl HotItemStore for SqliteStore {
    fn insert_hot_items(
        &self,
        source: &str,
        items: &[FetchedHotItem],
        fetched_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<HotRawItem>> {
        let mut conn = self.conn()?;

        let tx = conn.transaction()?;
        let mut inserted = Vec::new();

        for item in items {
            let title = item.title.trim();
            let dedup_key = HotRawItem::dedup_key(source, title);
            // First-seen row wins; a later duplicate inside the window is skipped
            let count = tx.execute(
                "INSERT INTO hot_items_raw (source, title, link, desc_text, hot, rank, dedup_key, fetched_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE NOT EXISTS (
                     SELECT 1 FROM hot_items_raw
                     WHERE dedup_key = ?7 AND source = ?1 AND title = ?2 AND fetched_at >= ?9
                 )",
                params![
                    source,
                    title,
                    item.link,
                    item.desc,
                    item.hot_score,
                    item.rank,
                    dedup_key,
                    to_ts(fetched_at),
                    to_ts(window_start)
                ],
            )?;
            if count == 1 {
                inserted.push(HotRawItem {
                    id: tx.last_insert_rowid(),
                    source: source.to_string(),
                    title: title.to_string(),
                    link: item.link.clone(),
                    desc: item.desc.clone(),
                    hot_score: item.hot_score.clone(),
                    rank: item.rank,
                    fetched_at: from_ts(to_ts(fetched_at)),
                });
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn recent_hot_items(
        &self,
        sources: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<HotRawItem>> {
        let conn = self.conn()?;

        let mut values: Vec<Value> = vec![Value::Integer(to_ts(since))];
        let source_clause = if sources.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> =
                (0..sources.len()).map(|i| format!("?{}", i + 2)).collect();
            values.extend(sources.iter().map(|s| Value::Text(s.clone())));
            format!(" AND source IN ({})", placeholders.join(", "))
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hot_items_raw
             WHERE fetched_at >= ?1{}
             ORDER BY rank ASC, fetched_at DESC, id ASC",
            HOT_ITEM_COLUMNS, source_clause
        ))?;

        let items = stmt
            .query_map(params_from_iter(values), hot_item_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn prune_hot_items_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM hot_items_raw WHERE fetched_at < ?1",
            params![to_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    fn add_push_config(&self, config: &NewPushConfig, now: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO hot_push_config (category_code, category_name, sources, include_keywords,
                 exclude_keywords, push_time, channel, webhook, max_items, is_active,
                 create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
            params![
                config.category_code,
                config.category_name,
                serde_json::to_string(&config.sources)?,
                serde_json::to_string(&config.include_keywords)?,
                serde_json::to_string(&config.exclude_keywords)?,
                config.push_time,
                config.channel,
                config.webhook,
                config.max_items as i64,
                to_ts(now)
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_push_config(&self, category_code: &str) -> Result<Option<HotPushConfig>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM hot_push_config WHERE category_code = ?1",
                    PUSH_CONFIG_COLUMNS
                ),
                params![category_code],
                push_config_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn list_push_configs(&self, active_only: bool) -> Result<Vec<HotPushConfig>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM hot_push_config
             WHERE (?1 = 0 OR is_active = 1)
             ORDER BY id ASC",
            PUSH_CONFIG_COLUMNS
        ))?;

        let configs = stmt
            .query_map(params![active_only], push_config_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(configs)
    }

    fn set_push_keywords(
        &self,
        category_code: &str,
        include: &[String],
        exclude: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE hot_push_config
             SET include_keywords = ?2, exclude_keywords = ?3, update_time = ?4
             WHERE category_code = ?1",
            params![
                category_code,
                serde_json::to_string(include)?,
                serde_json::to_string(exclude)?,
                to_ts(now)
            ],
        )?;
        Ok(updated == 1)
    }

    fn set_push_active(
        &self,
        category_code: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE hot_push_config SET is_active = ?2, update_time = ?3 WHERE category_code = ?1",
            params![category_code, active, to_ts(now)],
        )?;
        Ok(updated == 1)
    }

    fn record_push_history(
        &self,
        config_id: i64,
        pushed_at: DateTime<Utc>,
        item_ids: &[i64],
        status: PushStatus,
        error_msg: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO hot_push_history (config_id, pushed_at, items_count, item_ids, status, error_msg)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                config_id,
                to_ts(pushed_at),
                item_ids.len() as i64,
                serde_json::to_string(item_ids)?,
                status.as_str(),
                error_msg
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn pushed_item_ids(&self, config_id: i64, since: DateTime<Utc>) -> Result<HashSet<i64>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT item_ids FROM hot_push_history
             WHERE config_id = ?1 AND pushed_at >= ?2 AND status IN (?3, ?4)",
        )?;

        let rows = stmt
            .query_map(
                params![
                    config_id,
                    to_ts(since),
                    PushStatus::Ok.as_str(),
                    PushStatus::Partial.as_str()
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ids = HashSet::new();
        for raw in rows {
            let batch: Vec<i64> = serde_json::from_str(&raw).unwrap_or_default();
            ids.extend(batch);
        }
        Ok(ids)
    }

    fn push_history(&self, config_id: i64, limit: usize) -> Result<Vec<HotPushHistory>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, config_id, pushed_at, items_count, item_ids, status, error_msg
             FROM hot_push_history
             WHERE config_id = ?1
             ORDER BY pushed_at DESC, id DESC
             LIMIT ?2",
        )?;

        let history = stmt
            .query_map(params![config_id, limit as i64], |row| {
                Ok(HotPushHistory {
                    id: row.get(0)?,
                    config_id: row.get(1)?,
                    pushed_at: from_ts(row.get(2)?),
                    items_count: row.get::<_, i64>(3)?.max(0) as usize,
                    item_ids: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    status: row
                        .get::<_, String>(5)?
                        .parse()
                        .unwrap_or(PushStatus::Failed),
                    error_msg: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(history)
    }
}
