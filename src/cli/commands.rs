use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::app::{AppContext, FastfishError, Result};
use crate::articles::{ArticleEdit, IngestRequest};
use crate::cli::BodyArgs;
use crate::domain::hot::{parse_span, span_start};
use crate::domain::{
    Article, ArticleFilter, HotPushConfig, NewPushConfig, PoolVariant, PushStatus, ReleaseOutcome,
};
use crate::fetcher::FetchRequest;
use crate::lexicon::LexiconStore;
use crate::store::HotItemStore;

fn variant(raw: bool) -> PoolVariant {
    if raw {
        PoolVariant::Raw
    } else {
        PoolVariant::Rewritten
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_body(body: &BodyArgs) -> Result<Option<String>> {
    match (&body.content, &body.content_file) {
        (Some(content), _) => Ok(Some(content.clone())),
        (None, Some(path)) => Ok(Some(std::fs::read_to_string(path)?)),
        (None, None) => Ok(None),
    }
}

fn print_article_line(article: &Article) {
    let holder = article
        .holder()
        .map(|h| format!(" locked by {}", h))
        .unwrap_or_default();
    println!(
        "#{} [{}] {}{}",
        article.id, article.status, article.title, holder
    );
}

pub fn check(ctx: &AppContext, title: &str, body: &BodyArgs, json: bool) -> Result<()> {
    let content = read_body(body)?.unwrap_or_default();
    let report = ctx.articles.screen(title, &content);

    if json {
        return print_json(&report);
    }

    println!("{}", report.summary());
    for located in &report.hits {
        println!(
            "  {:?} {} at {} ({})",
            located.location,
            located.hit.word,
            located.hit.position,
            located.hit.category.label()
        );
    }
    Ok(())
}

pub fn lexicon_status(ctx: &AppContext) -> Result<()> {
    let dir = ctx.lexicon.dir();
    let snapshot = LexiconStore::load(dir);
    println!("Lexicon directory: {}", dir.display());
    println!(
        "Active matcher: {} words",
        ctx.lexicon.snapshot().word_count()
    );

    let counts = snapshot.count_by_category();
    if counts.is_empty() {
        println!("No lexicon loaded, screening is skipped");
        return Ok(());
    }
    for (category, count) in counts {
        println!("  {:<12} {}", category.label(), count);
    }
    println!("Total: {} words", snapshot.entries.len());
    Ok(())
}

pub fn ingest(ctx: &AppContext, args: &crate::cli::IngestArgs, json: bool) -> Result<()> {
    let now = Utc::now();

    if let Some(path) = &args.batch {
        let requests = read_batch(path)?;
        let outcome = ctx.articles.ingest_batch(&requests, now);
        if json {
            return print_json(&outcome);
        }
        for entry in &outcome.results {
            match entry.article_id {
                Some(id) if entry.ok => println!("  + #{} {}", id, entry.message),
                _ => eprintln!("  ! {}", entry.message),
            }
        }
        println!(
            "Ingest complete: {} of {} stored",
            outcome.success_count, outcome.total
        );
        return Ok(());
    }

    let request = IngestRequest {
        title: args.title.clone().unwrap_or_default(),
        content: read_body(&args.body)?.unwrap_or_default(),
        pic: args.pic.clone(),
        source_url: args.source_url.clone(),
        source_id: args.source_id,
        task_id: args.task_id,
        category_id: args.category_id,
        quality_score: args.quality_score,
        is_markdown: args.markdown,
    };
    let outcome = ctx.articles.ingest_article(&request, now)?;

    if json {
        return print_json(&outcome);
    }
    println!(
        "Stored article #{} (raw #{}) as {}",
        outcome.article_id, outcome.raw_id, outcome.status
    );
    println!("{}", outcome.compliance.summary());
    Ok(())
}

fn read_batch(path: &Path) -> Result<Vec<IngestRequest>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn update(
    ctx: &AppContext,
    id: i64,
    title: Option<String>,
    body: &BodyArgs,
    pic: Option<String>,
    markdown: bool,
    json: bool,
) -> Result<()> {
    let edit = ArticleEdit {
        title,
        content: read_body(body)?,
        pic,
        is_markdown: markdown,
    };
    let outcome = ctx.articles.update_article(id, &edit, Utc::now())?;

    if json {
        return print_json(&outcome);
    }
    println!("Updated article #{} ({})", outcome.article_id, outcome.status);
    println!("{}", outcome.compliance.summary());
    Ok(())
}

pub fn available(ctx: &AppContext, raw: bool, limit: usize, json: bool) -> Result<()> {
    let articles = ctx.articles.available(variant(raw), limit)?;

    if json {
        return print_json(&articles);
    }
    if articles.is_empty() {
        println!("No available articles");
        return Ok(());
    }
    for article in articles {
        println!(
            "#{} {} {}\n  {}",
            article.id,
            article.created_at.format("%Y-%m-%d"),
            article.title,
            article.summary
        );
    }
    Ok(())
}

pub fn claim(
    ctx: &AppContext,
    user: &str,
    raw: bool,
    category_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let filter = ArticleFilter {
        category_id,
        ..Default::default()
    };
    let claimed = ctx.allocation.claim(variant(raw), &filter, user, Utc::now())?;

    if json {
        return print_json(&claimed);
    }
    match claimed {
        Some(article) => {
            println!("Claimed article #{} for {}", article.id, user);
            println!("{}", article.title);
        }
        None => println!("No article available"),
    }
    Ok(())
}

pub fn release(
    ctx: &AppContext,
    id: i64,
    user: &str,
    outcome: &str,
    raw: bool,
    json: bool,
) -> Result<()> {
    let outcome: ReleaseOutcome = outcome.parse().map_err(FastfishError::Other)?;
    let article = ctx
        .allocation
        .release(variant(raw), id, user, outcome, Utc::now())?;

    if json {
        return print_json(&article);
    }
    print_article_line(&article);
    Ok(())
}

pub fn extend(ctx: &AppContext, id: i64, user: &str, raw: bool, json: bool) -> Result<()> {
    let article = ctx.allocation.extend(variant(raw), id, user, Utc::now())?;

    if json {
        return print_json(&article);
    }
    println!("Lease on article #{} renewed for {}", article.id, user);
    Ok(())
}

pub fn expire(ctx: &AppContext, raw: bool) -> Result<()> {
    let freed = ctx.allocation.expire_stale(variant(raw), Utc::now())?;
    println!("Freed {} expired claim(s)", freed);
    Ok(())
}

pub async fn hot_platforms(ctx: &AppContext, json: bool) -> Result<()> {
    let platforms = ctx.scheduler.list_platforms().await?;
    if json {
        return print_json(&platforms);
    }
    for platform in platforms {
        println!("{}", platform);
    }
    Ok(())
}

pub async fn hot_fetch(
    ctx: &AppContext,
    sources: Vec<String>,
    category: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let mut request = FetchRequest {
        sources,
        ..Default::default()
    };
    request.limit_per_source = limit.unwrap_or(ctx.config.hot.limit_per_source);

    if let Some(code) = category {
        let config = find_push_config(ctx, code)?;
        if request.sources.is_empty() {
            request.sources = config.sources.clone();
        }
        request.filter = Some(config.keyword_filter()).filter(|f| !f.is_empty());
    }

    let report = ctx
        .scheduler
        .fetch(&request, ctx.store.clone(), Utc::now())
        .await?;

    for error in &report.errors {
        eprintln!("  Error fetching {}", error);
    }
    println!(
        "Fetch complete: {} sources, {} new items, {} duplicates, {} filtered, {} errors",
        report.attempted.len(),
        report.inserted.len(),
        report.duplicates,
        report.filtered,
        report.errors.len()
    );
    Ok(())
}

pub fn hot_show(ctx: &AppContext, category: &str, json: bool) -> Result<()> {
    let config = find_push_config(ctx, category)?;
    let items = ctx.push.select_items(&config, Utc::now())?;

    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("Nothing new for {}", config.category_name);
        return Ok(());
    }
    for (idx, item) in items.iter().enumerate() {
        println!("{}. [{}] {}\n   {}", idx + 1, item.source, item.title, item.link);
    }
    Ok(())
}

pub fn hot_prune(ctx: &AppContext, older_than: Option<&str>) -> Result<()> {
    let retention = match older_than {
        Some(span) => parse_span(span).map_err(FastfishError::Other)?,
        None => ctx.config.hot.retention(),
    };
    let removed = ctx
        .store
        .prune_hot_items_before(span_start(Utc::now(), retention))?;
    println!("Removed {} hot item(s)", removed);
    Ok(())
}

fn find_push_config(ctx: &AppContext, code: &str) -> Result<HotPushConfig> {
    ctx.store
        .get_push_config(code)?
        .ok_or_else(|| FastfishError::PushConfigNotFound(code.to_string()))
}

/// Runs due pushes. Fails when any category could not be delivered.
pub async fn push(ctx: &AppContext, category: Option<&str>, force: bool, json: bool) -> Result<()> {
    let configs = match category {
        Some(code) => vec![find_push_config(ctx, code)?],
        None => ctx.store.list_push_configs(true)?,
    };
    if configs.is_empty() {
        println!("No active push configs");
        return Ok(());
    }

    let results = ctx.push.run_due(&configs, Utc::now(), force).await;

    let mut failures = 0;
    let mut outcomes = Vec::new();
    for (code, result) in results {
        match result {
            Ok(outcome) => {
                if outcome.status != PushStatus::Ok {
                    failures += 1;
                }
                if !json {
                    println!(
                        "  {}: {} ({} items)",
                        code, outcome.status, outcome.items_count
                    );
                    if let Some(error) = &outcome.error {
                        eprintln!("    {}", error);
                    }
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {}: {}", code, e);
            }
        }
    }

    if json {
        print_json(&outcomes)?;
    } else if outcomes.is_empty() && failures == 0 {
        println!("No push due");
    }

    if failures > 0 {
        return Err(FastfishError::Other(format!(
            "{} push(es) did not complete",
            failures
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn push_config_add(
    ctx: &AppContext,
    code: &str,
    name: &str,
    sources: Vec<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    push_time: &str,
    channel: &str,
    webhook: &str,
    max_items: usize,
) -> Result<()> {
    if ctx.store.get_push_config(code)?.is_some() {
        println!("Push config already exists: {}", code);
        return Ok(());
    }
    let config = NewPushConfig {
        category_code: code.to_string(),
        category_name: name.to_string(),
        sources,
        include_keywords: include,
        exclude_keywords: exclude,
        push_time: push_time.to_string(),
        channel: channel.to_string(),
        webhook: webhook.to_string(),
        max_items,
    };
    let id = ctx.store.add_push_config(&config, Utc::now())?;
    println!("Added push config {} (#{})", code, id);
    Ok(())
}

pub fn push_config_list(ctx: &AppContext, all: bool, json: bool) -> Result<()> {
    let configs = ctx.store.list_push_configs(!all)?;

    if json {
        return print_json(&configs);
    }
    if configs.is_empty() {
        println!("No push configs");
        return Ok(());
    }
    for config in configs {
        let active = if config.is_active { "on " } else { "off" };
        let sources = if config.sources.is_empty() {
            "all sources".to_string()
        } else {
            config.sources.join(",")
        };
        println!(
            "[{}] {} {} via {} at {}\n  {} | +{} -{} | max {}",
            active,
            config.category_code,
            config.category_name,
            config.channel,
            if config.push_time.is_empty() { "every run" } else { &config.push_time },
            sources,
            config.include_keywords.join(","),
            config.exclude_keywords.join(","),
            config.max_items
        );
    }
    Ok(())
}

pub fn push_config_set_keywords(
    ctx: &AppContext,
    code: &str,
    include: &[String],
    exclude: &[String],
) -> Result<()> {
    if !ctx
        .store
        .set_push_keywords(code, include, exclude, Utc::now())?
    {
        return Err(FastfishError::PushConfigNotFound(code.to_string()));
    }
    println!("Updated keywords for {}", code);
    Ok(())
}

pub fn push_config_set_active(ctx: &AppContext, code: &str, active: bool) -> Result<()> {
    if !ctx.store.set_push_active(code, active, Utc::now())? {
        return Err(FastfishError::PushConfigNotFound(code.to_string()));
    }
    println!(
        "{} {}",
        if active { "Enabled" } else { "Disabled" },
        code
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn context() -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.lexicon.dir = Some(dir.path().to_path_buf());
        let ctx = AppContext::in_memory(config).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_read_body_prefers_inline_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("body.html");
        std::fs::write(&file, "<p>from file</p>").unwrap();

        let inline = BodyArgs {
            content: Some("inline".into()),
            content_file: None,
        };
        assert_eq!(read_body(&inline).unwrap().as_deref(), Some("inline"));

        let from_file = BodyArgs {
            content: None,
            content_file: Some(file),
        };
        assert_eq!(
            read_body(&from_file).unwrap().as_deref(),
            Some("<p>from file</p>")
        );
        assert_eq!(read_body(&BodyArgs::default()).unwrap(), None);
    }

    #[test]
    fn test_read_batch_parses_partial_objects() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("batch.json");
        std::fs::write(
            &file,
            r#"[{"title": "一", "content": "<p>正文</p>"}, {"title": "二", "category_id": 4}]"#,
        )
        .unwrap();

        let requests = read_batch(&file).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].category_id, 4);
        assert!(requests[1].content.is_empty());
    }

    #[test]
    fn test_release_rejects_unknown_outcome() {
        let (_dir, ctx) = context();
        let err = release(&ctx, 1, "u1", "maybe", false, false).unwrap_err();
        assert!(err.to_string().contains("Unknown release outcome"));
    }

    #[test]
    fn test_push_config_commands_round_trip() {
        let (_dir, ctx) = context();
        push_config_add(
            &ctx,
            "tech",
            "科技",
            vec!["weibo".into()],
            vec!["AI".into()],
            vec![],
            "09:00",
            "feishu",
            "https://example.com/hook",
            10,
        )
        .unwrap();

        push_config_set_keywords(&ctx, "tech", &["芯片".to_string()], &[]).unwrap();
        push_config_set_active(&ctx, "tech", false).unwrap();

        let config = ctx.store.get_push_config("tech").unwrap().unwrap();
        assert_eq!(config.include_keywords, vec!["芯片"]);
        assert!(!config.is_active);

        assert!(matches!(
            push_config_set_active(&ctx, "absent", true),
            Err(FastfishError::PushConfigNotFound(_))
        ));
    }

    #[test]
    fn test_hot_prune_rejects_bad_span() {
        let (_dir, ctx) = context();
        assert!(hot_prune(&ctx, Some("soon")).is_err());
        hot_prune(&ctx, Some("7d")).unwrap();
    }
}
