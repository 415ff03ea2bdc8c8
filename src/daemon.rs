//! Long-running scheduler for hot fetches, pushes and lease expiry.
//!
//! Runs in the foreground; use a process supervisor to keep it alive.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::{AppContext, FastfishError};
use crate::domain::hot::{local_offset, parse_span, span_start};
use crate::domain::PoolVariant;
use crate::fetcher::FetchRequest;
use crate::store::HotItemStore;

/// Pushes, lease expiry and pruning run on this period.
const MAINTENANCE_TICK_SECS: u64 = 60;
const MAX_FETCH_INTERVAL_SECS: u64 = 365 * 86400;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Hot fetch interval in seconds (default: 4 hours)
    pub fetch_interval_secs: u64,
    /// Whether to fetch immediately on start
    pub fetch_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            fetch_interval_secs: 4 * 3600,
            fetch_on_start: true,
        }
    }
}

impl DaemonConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> Result<u64, String> {
        let span = parse_span(s)?;
        if span <= chrono::Duration::zero() {
            return Err("Interval must be greater than zero".to_string());
        }
        let secs = span.num_seconds() as u64;
        if secs > MAX_FETCH_INTERVAL_SECS {
            return Err(format!("Interval too long: {} (max 365d)", s.trim()));
        }
        Ok(secs)
    }

    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("fastfish").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        let Some(pid_path) = Self::pid_file_path() else {
            return false;
        };
        fs::read_to_string(pid_path)
            .ok()
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    pub async fn run(&self) -> crate::app::Result<()> {
        if Self::is_running() {
            return Err(FastfishError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }
        self.write_pid_file()
            .map_err(|e| FastfishError::Other(format!("Failed to write PID file: {}", e)))?;

        self.install_signal_handlers();

        info!(
            "fastfish daemon started (fetch interval: {}, PID: {})",
            DaemonConfig::format_interval(self.config.fetch_interval_secs),
            std::process::id()
        );

        let mut fetch_timer = interval(Duration::from_secs(self.config.fetch_interval_secs));
        fetch_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.config.fetch_on_start {
            // The first tick completes immediately
            fetch_timer.tick().await;
        }

        let mut maintenance = interval(Duration::from_secs(MAINTENANCE_TICK_SECS));
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_push_slot: Option<String> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = fetch_timer.tick() => self.run_fetch().await,
                _ = maintenance.tick() => {
                    let now = Utc::now();
                    let slot = self.minute_slot(now);
                    if last_push_slot.as_deref() != Some(slot.as_str()) {
                        self.run_pushes(now).await;
                        last_push_slot = Some(slot);
                    }
                    self.run_maintenance(now);
                }
            }
        }

        info!("Daemon shutting down");
        self.remove_pid_file();
        Ok(())
    }

    #[cfg(unix)]
    fn install_signal_handlers(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown = self.shutdown.clone();
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to set up shutdown signal handlers: {}", e);
                    return;
                }
            };
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            shutdown.notify_one();
        });

        let lexicon = self.ctx.lexicon.clone();
        match signal(SignalKind::hangup()) {
            Ok(mut sighup) => {
                tokio::spawn(async move {
                    while sighup.recv().await.is_some() {
                        lexicon.reload();
                    }
                });
            }
            Err(e) => warn!("Failed to set up SIGHUP handler: {}", e),
        }
    }

    #[cfg(windows)]
    fn install_signal_handlers(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.notify_one();
        });
    }

    fn minute_slot(&self, now: DateTime<Utc>) -> String {
        let offset = local_offset(self.ctx.config.hot.utc_offset_hours);
        now.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
    }

    /// Sources wanted by active push configs; empty when any of them wants all.
    fn fetch_sources(&self) -> crate::app::Result<Vec<String>> {
        let configs = self.ctx.store.list_push_configs(true)?;
        if configs.is_empty() || configs.iter().any(|c| c.sources.is_empty()) {
            return Ok(Vec::new());
        }
        let mut sources: Vec<String> = configs.into_iter().flat_map(|c| c.sources).collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    async fn run_fetch(&self) {
        let start = Utc::now();
        let sources = match self.fetch_sources() {
            Ok(sources) => sources,
            Err(e) => {
                error!("Failed to load push configs: {}", e);
                return;
            }
        };
        let request = FetchRequest {
            sources,
            filter: None,
            limit_per_source: self.ctx.config.hot.limit_per_source,
        };

        match self
            .ctx
            .scheduler
            .fetch(&request, self.ctx.store.clone(), start)
            .await
        {
            Ok(report) => {
                let elapsed = Utc::now().signed_duration_since(start);
                info!(
                    "Fetch complete: {} new items, {} duplicates, {} errors ({:.1}s)",
                    report.inserted.len(),
                    report.duplicates,
                    report.errors.len(),
                    elapsed.num_milliseconds() as f64 / 1000.0
                );
            }
            Err(e) => error!("Fetch failed: {}", e),
        }
    }

    async fn run_pushes(&self, now: DateTime<Utc>) {
        let configs = match self.ctx.store.list_push_configs(true) {
            Ok(configs) => configs,
            Err(e) => {
                error!("Failed to load push configs: {}", e);
                return;
            }
        };
        for (code, result) in self.ctx.push.run_due(&configs, now, false).await {
            if let Err(e) = result {
                error!("[{}] push aborted: {}", code, e);
            }
        }
    }

    fn run_maintenance(&self, now: DateTime<Utc>) {
        for variant in [PoolVariant::Raw, PoolVariant::Rewritten] {
            match self.ctx.allocation.expire_stale(variant, now) {
                Ok(0) => {}
                Ok(freed) => info!("Freed {} expired {:?} claim(s)", freed, variant),
                Err(e) => error!("Lease expiry failed for {:?}: {}", variant, e),
            }
        }

        let cutoff = span_start(now, self.ctx.config.hot.retention());
        if let Err(e) = self.ctx.store.prune_hot_items_before(cutoff) {
            error!("Pruning hot items failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::config::Config;
    use crate::domain::NewPushConfig;

    fn context() -> (tempfile::TempDir, Arc<AppContext>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.lexicon.dir = Some(dir.path().to_path_buf());
        (dir, Arc::new(AppContext::in_memory(config).unwrap()))
    }

    fn push_config(code: &str, sources: &[&str]) -> NewPushConfig {
        NewPushConfig {
            category_code: code.into(),
            category_name: code.into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            channel: "feishu".into(),
            webhook: "https://example.com/hook".into(),
            max_items: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(DaemonConfig::parse_interval("1h").unwrap(), 3600);
        assert_eq!(DaemonConfig::parse_interval("30m").unwrap(), 1800);
        assert_eq!(DaemonConfig::parse_interval("1d").unwrap(), 86400);
        assert_eq!(DaemonConfig::parse_interval("60s").unwrap(), 60);
        assert_eq!(DaemonConfig::parse_interval("3600").unwrap(), 3600);
        assert_eq!(DaemonConfig::parse_interval("4h").unwrap(), 14400);
        assert!(DaemonConfig::parse_interval("invalid").is_err());
        assert!(DaemonConfig::parse_interval("0m").is_err());
        assert!(DaemonConfig::parse_interval("366d").is_err());
        assert!(DaemonConfig::parse_interval("999999999999d").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(DaemonConfig::format_interval(3600), "1h");
        assert_eq!(DaemonConfig::format_interval(1800), "30m");
        assert_eq!(DaemonConfig::format_interval(86400), "1d");
        assert_eq!(DaemonConfig::format_interval(90), "90s");
        assert_eq!(DaemonConfig::format_interval(14400), "4h");
    }

    #[test]
    fn test_fetch_sources_union_of_active_configs() {
        let (_dir, ctx) = context();
        let now = Utc::now();
        ctx.store
            .add_push_config(&push_config("a", &["weibo", "zhihu"]), now)
            .unwrap();
        ctx.store
            .add_push_config(&push_config("b", &["zhihu", "douyin"]), now)
            .unwrap();
        let daemon = Daemon::new(ctx.clone(), DaemonConfig::default());
        assert_eq!(
            daemon.fetch_sources().unwrap(),
            vec!["douyin", "weibo", "zhihu"]
        );

        ctx.store
            .add_push_config(&push_config("c", &[]), now)
            .unwrap();
        assert!(daemon.fetch_sources().unwrap().is_empty());
    }

    #[test]
    fn test_minute_slot_uses_local_offset() {
        let (_dir, ctx) = context();
        let daemon = Daemon::new(ctx, DaemonConfig::default());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 16, 30, 45).unwrap();
        assert_eq!(daemon.minute_slot(now), "2024-03-02 00:30");
    }

    #[test]
    fn test_maintenance_frees_expired_claims() {
        let (_dir, ctx) = context();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let request = crate::articles::IngestRequest {
            title: "标题".into(),
            content: "<p>正文</p>".into(),
            ..Default::default()
        };
        let outcome = ctx.articles.ingest_article(&request, t0).unwrap();
        let claimed = ctx
            .allocation
            .claim(
                PoolVariant::Rewritten,
                &Default::default(),
                "u1",
                t0,
            )
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, outcome.article_id);

        let daemon = Daemon::new(ctx.clone(), DaemonConfig::default());
        daemon.run_maintenance(t0 + chrono::Duration::seconds(601));

        let article = ctx
            .allocation
            .claim(
                PoolVariant::Rewritten,
                &Default::default(),
                "u2",
                t0 + chrono::Duration::seconds(602),
            )
            .unwrap();
        assert_eq!(article.map(|a| a.id), Some(outcome.article_id));
    }
}
