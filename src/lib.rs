//! # fastfish
//!
//! A screened article pool handed out to consumers under time-bounded leases,
//! plus a hot-topic pipeline that fetches trending lists and pushes
//! deduplicated digests to messaging channels.
//!
//! ## Architecture
//!
//! ```text
//! articles:  ingest → lexicon screening → Store ← claim / release / extend (leases)
//! hot:       HotSource → normalizer → Store (dedup on write) → push engine → Notifier
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Screen a text
//! fastfish check --title "标题" --content-file body.html
//!
//! # Add an article, then claim it for a consumer
//! fastfish ingest --title "标题" --content-file body.html --category-id 3
//! fastfish claim --user publisher-1
//!
//! # Fetch hot lists and push due digests
//! fastfish hot fetch --source weibo,zhihu
//! fastfish push
//!
//! # Run everything on a schedule
//! fastfish daemon --fetch-interval 4h
//! ```

/// Lease-based claim, release, renewal and expiry of pooled articles.
pub mod allocation;

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components
/// from one [`Config`](config::Config).
pub mod app;

/// Article ingestion, editing and the available-article listing.
pub mod articles;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/fastfish/config.toml`.
pub mod config;

/// Foreground scheduler for fetches, pushes and lease expiry.
pub mod daemon;

/// Core domain models.
///
/// - [`Article`](domain::Article): pooled article with allocation columns
/// - [`HotRawItem`](domain::HotRawItem): one stored trending-list entry
/// - [`HotPushConfig`](domain::HotPushConfig): one push category
/// - [`LexiconEntry`](domain::LexiconEntry): one sensitive word
pub mod domain;

/// Hot-list fetching.
///
/// - [`HotSource`](fetcher::HotSource): async trait for upstream providers
/// - [`HttpHotSource`](fetcher::HttpHotSource): reqwest-based implementation
/// - [`HotIngestScheduler`](fetcher::HotIngestScheduler): concurrent fetching with a semaphore
pub mod fetcher;

/// Sensitive-word lexicon loading, matching and compliance reports.
pub mod lexicon;

/// Text cleanup shared by screening and hot-item normalization.
pub mod normalizer;

/// Hot-topic digests and channel delivery.
pub mod push;

/// SQLite persistence layer.
///
/// - [`ArticlePool`](store::ArticlePool): article rows and allocation CAS
/// - [`HotItemStore`](store::HotItemStore): hot items, push configs and history
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation of both
pub mod store;
