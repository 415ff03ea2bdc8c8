use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fastfish::app::AppContext;
use fastfish::cli::{commands, Cli, Commands, HotAction, PushConfigAction};
use fastfish::config::Config;
use fastfish::daemon::{Daemon, DaemonConfig};

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Daemon { log, .. } => log.as_deref(),
        _ => None,
    };
    init_tracing(log_file)?;

    let config = Config::load(cli.config.as_deref())?;
    let ctx = AppContext::new(config, cli.db.clone(), cli.workers)?;
    let json = cli.json;

    match cli.command {
        Commands::Check { title, body } => {
            commands::check(&ctx, &title, &body, json)?;
        }
        Commands::Lexicon => {
            commands::lexicon_status(&ctx)?;
        }
        Commands::Ingest(args) => {
            commands::ingest(&ctx, &args, json)?;
        }
        Commands::Update {
            id,
            title,
            body,
            pic,
            markdown,
        } => {
            commands::update(&ctx, id, title, &body, pic, markdown, json)?;
        }
        Commands::Available { raw, limit } => {
            commands::available(&ctx, raw, limit, json)?;
        }
        Commands::Claim {
            user,
            raw,
            category_id,
        } => {
            commands::claim(&ctx, &user, raw, category_id, json)?;
        }
        Commands::Release {
            id,
            user,
            outcome,
            raw,
        } => {
            commands::release(&ctx, id, &user, &outcome, raw, json)?;
        }
        Commands::Extend { id, user, raw } => {
            commands::extend(&ctx, id, &user, raw, json)?;
        }
        Commands::Expire { raw } => {
            commands::expire(&ctx, raw)?;
        }
        Commands::Hot { action } => match action {
            HotAction::Platforms => commands::hot_platforms(&ctx, json).await?,
            HotAction::Fetch {
                source,
                category,
                limit,
            } => commands::hot_fetch(&ctx, source, category.as_deref(), limit).await?,
            HotAction::Show { category } => commands::hot_show(&ctx, &category, json)?,
            HotAction::Prune { older_than } => {
                commands::hot_prune(&ctx, older_than.as_deref())?
            }
        },
        Commands::Push { category, force } => {
            commands::push(&ctx, category.as_deref(), force, json).await?;
        }
        Commands::PushConfig { action } => match action {
            PushConfigAction::Add {
                code,
                name,
                sources,
                include,
                exclude,
                push_time,
                channel,
                webhook,
                max_items,
            } => commands::push_config_add(
                &ctx, &code, &name, sources, include, exclude, &push_time, &channel, &webhook,
                max_items,
            )?,
            PushConfigAction::List { all } => commands::push_config_list(&ctx, all, json)?,
            PushConfigAction::SetKeywords {
                code,
                include,
                exclude,
            } => commands::push_config_set_keywords(&ctx, &code, &include, &exclude)?,
            PushConfigAction::SetActive { code, active } => {
                commands::push_config_set_active(&ctx, &code, active)?
            }
        },
        Commands::Daemon {
            fetch_interval,
            no_initial_fetch,
            ..
        } => {
            let config = DaemonConfig {
                fetch_interval_secs: DaemonConfig::parse_interval(&fetch_interval)
                    .map_err(|e| anyhow::anyhow!(e))?,
                fetch_on_start: !no_initial_fetch,
            };
            Daemon::new(Arc::new(ctx), config).run().await?;
        }
    }

    Ok(())
}
