//! Hot-topic digests delivered to messaging channels without repeats.
//!
//! ```text
//! hot_items_raw (recency window) → keyword filter → dedup by link
//!     → minus recently pushed ids → digest chunks → Notifier → history row
//! ```

pub mod digest;
pub mod notifier;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::Result;
use crate::domain::hot::span_start;
use crate::domain::{ChannelKind, HotPushConfig, HotRawItem, PushStatus, RecencyWindow};
use crate::store::HotItemStore;

pub use digest::DigestChunk;
pub use notifier::{ChannelDeliveryError, HttpNotifier, Notifier};

pub const DEFAULT_HISTORY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct PushSettings {
    /// Raw items older than the window start are not candidates.
    pub window: RecencyWindow,
    /// How far back delivered ids are excluded.
    pub history_window: Duration,
    pub utc_offset_hours: i32,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            window: RecencyWindow::CalendarDay {
                utc_offset_hours: 8,
            },
            history_window: Duration::hours(DEFAULT_HISTORY_WINDOW_HOURS),
            utc_offset_hours: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub config_id: i64,
    pub category_code: String,
    pub status: PushStatus,
    pub items_count: usize,
    pub item_ids: Vec<i64>,
    pub error: Option<String>,
}

pub struct PushDedupEngine<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    settings: PushSettings,
}

impl<S: HotItemStore> PushDedupEngine<S> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        settings: PushSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    /// Items this config would push at `now`, in delivery order.
    pub fn select_items(
        &self,
        config: &HotPushConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<HotRawItem>> {
        let since = self.settings.window.start(now);
        let filter = config.keyword_filter();
        let candidates: Vec<HotRawItem> = self
            .store
            .recent_hot_items(&config.sources, since)?
            .into_iter()
            .filter(|item| filter.matches(&item.filter_text()))
            .collect();

        let pushed = self
            .store
            .pushed_item_ids(config.id, span_start(now, self.settings.history_window))?;

        let mut items: Vec<HotRawItem> = dedup_by_link(candidates)
            .into_iter()
            .filter(|item| !pushed.contains(&item.id))
            .collect();
        items.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then(b.fetched_at.cmp(&a.fetched_at))
                .then(a.id.cmp(&b.id))
        });
        items.truncate(config.max_items);
        Ok(items)
    }

    /// Deliver one config's digest and append exactly one history row.
    pub async fn run_push(
        &self,
        config: &HotPushConfig,
        now: DateTime<Utc>,
    ) -> Result<PushOutcome> {
        let channel = match config.channel.parse::<ChannelKind>() {
            Ok(channel) => channel,
            Err(e) => return self.finish(config, now, PushStatus::Failed, Vec::new(), Some(e)),
        };

        let items = self.select_items(config, now)?;
        if items.is_empty() {
            info!("[{}] nothing new to push", config.category_code);
            return self.finish(config, now, PushStatus::Ok, Vec::new(), None);
        }

        let header = digest::header(&config.category_name, now, self.settings.utc_offset_hours);
        let chunks = digest::build_chunks(&header, &items, channel.message_limit());

        let mut delivered = Vec::new();
        let mut failure = None;
        for chunk in &chunks {
            match self.notifier.send(channel, &config.webhook, &chunk.text).await {
                Ok(()) => delivered.extend_from_slice(&chunk.item_ids),
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        let status = match (&failure, delivered.is_empty()) {
            (None, _) => PushStatus::Ok,
            (Some(_), false) => PushStatus::Partial,
            (Some(_), true) => PushStatus::Failed,
        };
        self.finish(config, now, status, delivered, failure)
    }

    fn finish(
        &self,
        config: &HotPushConfig,
        now: DateTime<Utc>,
        status: PushStatus,
        item_ids: Vec<i64>,
        error: Option<String>,
    ) -> Result<PushOutcome> {
        self.store
            .record_push_history(config.id, now, &item_ids, status, error.as_deref())?;

        match status {
            PushStatus::Ok => info!(
                "[{}] pushed {} item(s)",
                config.category_code,
                item_ids.len()
            ),
            _ => warn!(
                "[{}] push {}: {} item(s) delivered, error: {}",
                config.category_code,
                status,
                item_ids.len(),
                error.as_deref().unwrap_or("")
            ),
        }

        Ok(PushOutcome {
            config_id: config.id,
            category_code: config.category_code.clone(),
            status,
            items_count: item_ids.len(),
            item_ids,
            error,
        })
    }

    /// Push every config that is due at `now` (or all of them when forced),
    /// configs in parallel.
    pub async fn run_due(
        &self,
        configs: &[HotPushConfig],
        now: DateTime<Utc>,
        force: bool,
    ) -> Vec<(String, Result<PushOutcome>)> {
        let due: Vec<&HotPushConfig> = configs
            .iter()
            .filter(|c| c.is_active)
            .filter(|c| force || c.is_due(now, self.settings.utc_offset_hours))
            .collect();

        let runs = due.iter().map(|config| async move {
            (config.category_code.clone(), self.run_push(config, now).await)
        });
        join_all(runs).await
    }
}

/// Keep one item per link, the one with the best rank.
pub fn dedup_by_link(items: Vec<HotRawItem>) -> Vec<HotRawItem> {
    let mut best: HashMap<String, HotRawItem> = HashMap::new();
    for item in items {
        let link = item.link.trim().to_string();
        if link.is_empty() {
            continue;
        }
        match best.get(&link) {
            Some(existing) if existing.rank <= item.rank => {}
            _ => {
                best.insert(link, item);
            }
        }
    }
    best.into_values().collect()
}
