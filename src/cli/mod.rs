pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fastfish")]
#[command(
    about = "Screened article pool with lease-based allocation, plus hot-topic push",
    long_about = None
)]
pub struct Cli {
    /// Config file (default: ~/.config/fastfish/config.toml)
    #[arg(long, env = "FASTFISH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path, overrides the config file
    #[arg(long, env = "FASTFISH_DB_PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Number of parallel workers for fetching hot sources
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Screen a title and body against the sensitive-word lexicon
    Check {
        #[arg(long, default_value = "")]
        title: String,

        #[command(flatten)]
        body: BodyArgs,
    },
    /// Show lexicon status and word counts per category
    Lexicon,
    /// Add articles to the pool
    Ingest(IngestArgs),
    /// Edit an unpublished article
    Update {
        /// Rewritten article id
        id: i64,

        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        body: BodyArgs,

        #[arg(long)]
        pic: Option<String>,

        /// The body is markdown source
        #[arg(long)]
        markdown: bool,
    },
    /// List free articles
    Available {
        /// Use the raw pool instead of the rewritten one
        #[arg(long)]
        raw: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Claim the oldest available article
    Claim {
        /// Requester id recorded as lock holder
        #[arg(long)]
        user: String,

        #[arg(long)]
        raw: bool,

        #[arg(long)]
        category_id: Option<i64>,
    },
    /// Release a claimed article
    Release {
        id: i64,

        #[arg(long)]
        user: String,

        /// consumed | requeue
        #[arg(long)]
        outcome: String,

        #[arg(long)]
        raw: bool,
    },
    /// Renew the lease on a claimed article
    Extend {
        id: i64,

        #[arg(long)]
        user: String,

        #[arg(long)]
        raw: bool,
    },
    /// Free every claim whose lease has expired
    Expire {
        #[arg(long)]
        raw: bool,
    },
    /// Hot-topic ingestion
    Hot {
        #[command(subcommand)]
        action: HotAction,
    },
    /// Push due hot-topic digests
    Push {
        /// Only this push category
        #[arg(long)]
        category: Option<String>,

        /// Ignore push_time schedules
        #[arg(long)]
        force: bool,
    },
    /// Manage push configurations
    PushConfig {
        #[command(subcommand)]
        action: PushConfigAction,
    },
    /// Run fetch, push and lease expiry on a schedule
    Daemon {
        /// Hot fetch interval (e.g., "30m", "4h", "1d")
        #[arg(long, default_value = "4h")]
        fetch_interval: String,

        /// Skip the fetch on start
        #[arg(long)]
        no_initial_fetch: bool,

        /// Log file path (default: stdout)
        #[arg(short, long)]
        log: Option<PathBuf>,
    },
}

/// Article body given inline or read from a file.
#[derive(Args, Clone, Default)]
pub struct BodyArgs {
    #[arg(long, conflicts_with = "content_file")]
    pub content: Option<String>,

    #[arg(long)]
    pub content_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct IngestArgs {
    #[arg(long, required_unless_present = "batch")]
    pub title: Option<String>,

    #[command(flatten)]
    pub body: BodyArgs,

    #[arg(long)]
    pub pic: Option<String>,

    #[arg(long)]
    pub source_url: Option<String>,

    #[arg(long)]
    pub source_id: Option<i64>,

    #[arg(long, default_value_t = 0)]
    pub task_id: i64,

    #[arg(long, default_value_t = 0)]
    pub category_id: i64,

    #[arg(long)]
    pub quality_score: Option<f64>,

    /// The body is markdown source
    #[arg(long)]
    pub markdown: bool,

    /// JSON file holding an array of articles
    #[arg(long, conflicts_with = "title")]
    pub batch: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum HotAction {
    /// List platforms offered by the hot API
    Platforms,
    /// Fetch hot lists and store new items
    Fetch {
        /// Comma separated sources (default: all, or the category's sources)
        #[arg(long, value_delimiter = ',')]
        source: Vec<String>,

        /// Apply this push category's sources and keywords
        #[arg(long)]
        category: Option<String>,

        /// Items kept per source
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show what a push category would send now
    Show {
        #[arg(long)]
        category: String,
    },
    /// Delete raw items older than the retention period
    Prune {
        /// e.g. "7d" (default: hot.retention_days)
        #[arg(long)]
        older_than: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PushConfigAction {
    /// Add a push category
    Add {
        #[arg(long)]
        code: String,

        #[arg(long)]
        name: String,

        /// Comma separated sources; empty means all
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Comma separated HH:MM list; empty means every run
        #[arg(long, default_value = "")]
        push_time: String,

        /// feishu | dingtalk | telegram | webhook
        #[arg(long)]
        channel: String,

        /// Webhook URL, or chat id for telegram
        #[arg(long)]
        webhook: String,

        #[arg(long, default_value_t = 10)]
        max_items: usize,
    },
    /// List push categories
    List {
        /// Include inactive categories
        #[arg(long)]
        all: bool,
    },
    /// Replace a category's keyword lists
    SetKeywords {
        #[arg(long)]
        code: String,

        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },
    /// Enable or disable a category
    SetActive {
        #[arg(long)]
        code: String,

        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
}
