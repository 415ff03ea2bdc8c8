//! Article ingestion, editing and listing on top of the article pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::{FastfishError, Result};
use crate::domain::{Article, ArticleFilter, ArticleStatus, NewArticle, PoolVariant};
use crate::lexicon::{compliance, ComplianceReport, LexiconHandle, ScreeningPolicy};
use crate::store::{ArticlePool, ArticleUpdate};

pub const SUMMARY_CHARS: usize = 100;

/// One article as handed in by a producer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestRequest {
    pub title: String,
    pub content: String,
    pub pic: Option<String>,
    pub source_url: Option<String>,
    pub source_id: Option<i64>,
    pub task_id: i64,
    pub category_id: i64,
    pub quality_score: Option<f64>,
    /// Markdown bodies may carry raw `<style>` blocks; HTML ones may not.
    pub is_markdown: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub raw_id: i64,
    pub article_id: i64,
    pub status: ArticleStatus,
    pub compliance: ComplianceReport,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub success_count: usize,
    pub results: Vec<BatchEntry>,
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub ok: bool,
    pub article_id: Option<i64>,
    pub status: Option<ArticleStatus>,
    pub message: String,
}

/// Fields an editor may change on an unpublished article.
#[derive(Debug, Clone, Default)]
pub struct ArticleEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub pic: Option<String>,
    pub is_markdown: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableArticle {
    pub id: i64,
    pub title: String,
    pub pic: Option<String>,
    pub summary: String,
    pub category_id: i64,
    pub created_at: DateTime<Utc>,
}

pub struct ArticleIngestor<P> {
    pool: Arc<P>,
    lexicon: Arc<LexiconHandle>,
    policy: ScreeningPolicy,
}

impl<P: ArticlePool> ArticleIngestor<P> {
    pub fn new(pool: Arc<P>, lexicon: Arc<LexiconHandle>, policy: ScreeningPolicy) -> Self {
        Self {
            pool,
            lexicon,
            policy,
        }
    }

    pub fn screen(&self, title: &str, content: &str) -> ComplianceReport {
        let matcher = self.lexicon.snapshot();
        compliance::check(&matcher, &self.policy, title, content)
    }

    /// Validate, screen and store one article in both pool variants.
    pub fn ingest_article(
        &self,
        request: &IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let title = clean_title(&request.title)?;
        let content = clean_content(&request.content, request.is_markdown)?;

        let report = self.screen(&title, &content);
        let status = screened_status(&report);
        if !report.performed {
            warn!("Article {:?} stored unscreened: {}", title, report.summary());
        }

        let mut article = NewArticle {
            source_id: request.source_id.unwrap_or(0),
            task_id: request.task_id,
            category_id: request.category_id,
            title,
            pic: non_blank(request.pic.as_deref()),
            content,
            source_url: non_blank(request.source_url.as_deref()),
            quality_score: request.quality_score,
            status: Some(status),
        };

        let raw_id = self.pool.insert_article(PoolVariant::Raw, &article, now)?;
        if request.source_id.is_none() {
            article.source_id = raw_id;
        }
        let article_id = self
            .pool
            .insert_article(PoolVariant::Rewritten, &article, now)?;

        info!(
            "Ingested article {} (raw {}) as {}",
            article_id, raw_id, status
        );

        Ok(IngestOutcome {
            raw_id,
            article_id,
            status,
            compliance: report,
        })
    }

    /// Ingest each request independently; one failure never stops the batch.
    pub fn ingest_batch(&self, requests: &[IngestRequest], now: DateTime<Utc>) -> BatchOutcome {
        let results: Vec<BatchEntry> = requests
            .iter()
            .map(|request| match self.ingest_article(request, now) {
                Ok(outcome) => BatchEntry {
                    ok: true,
                    article_id: Some(outcome.article_id),
                    status: Some(outcome.status),
                    message: outcome.compliance.summary(),
                },
                Err(e) => BatchEntry {
                    ok: false,
                    article_id: None,
                    status: None,
                    message: e.to_string(),
                },
            })
            .collect();

        BatchOutcome {
            total: requests.len(),
            success_count: results.iter().filter(|r| r.ok).count(),
            results,
        }
    }

    /// Edit a rewritten article and its raw counterpart. Published articles
    /// are immutable.
    pub fn update_article(
        &self,
        article_id: i64,
        edit: &ArticleEdit,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let current = self
            .pool
            .get_article(PoolVariant::Rewritten, article_id)?
            .ok_or(FastfishError::ArticleNotFound(article_id))?;
        if current.published_count > 0 {
            return Err(FastfishError::ArticleAlreadyPublished {
                article_id,
                published_count: current.published_count,
            });
        }
        if edit.title.is_none() && edit.content.is_none() && edit.pic.is_none() {
            return Err(FastfishError::InvalidArticle("nothing to update".into()));
        }

        let title = edit.title.as_deref().map(clean_title).transpose()?;
        let content = edit
            .content
            .as_deref()
            .map(|c| clean_content(c, edit.is_markdown))
            .transpose()?;

        let report = self.screen(
            title.as_deref().unwrap_or(&current.title),
            content.as_deref().unwrap_or(&current.content),
        );
        let status = screened_status(&report);

        let update = ArticleUpdate {
            title,
            content,
            pic: edit.pic.as_deref().map(|p| p.trim().to_string()),
            status: Some(status),
        };

        if !self
            .pool
            .update_unpublished(PoolVariant::Rewritten, article_id, &update, now)?
        {
            // Published between the check and the write
            return Err(FastfishError::AllocationConflict(article_id));
        }
        let raw_id = current.source_id;
        if raw_id > 0
            && !self
                .pool
                .update_unpublished(PoolVariant::Raw, raw_id, &update, now)?
        {
            warn!("Raw article {} not updated alongside {}", raw_id, article_id);
        }

        info!("Updated article {} ({})", article_id, status);
        Ok(IngestOutcome {
            raw_id,
            article_id,
            status,
            compliance: report,
        })
    }

    /// Free screened articles with a title, newest first.
    pub fn available(&self, variant: PoolVariant, limit: usize) -> Result<Vec<AvailableArticle>> {
        let articles = self
            .pool
            .list_available(variant, &ArticleFilter::default(), limit)?;
        Ok(articles.iter().map(AvailableArticle::from).collect())
    }
}

impl From<&Article> for AvailableArticle {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id,
            title: article.title.clone(),
            pic: article.pic.clone(),
            summary: article.summary(SUMMARY_CHARS),
            category_id: article.category_id,
            created_at: article.created_at,
        }
    }
}

fn screened_status(report: &ComplianceReport) -> ArticleStatus {
    if report.passed {
        ArticleStatus::Screened
    } else {
        ArticleStatus::Rejected
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Trim and drop a trailing template marker such as `(minimal 样式)`.
pub fn clean_title(raw: &str) -> Result<String> {
    let title = strip_style_suffix(raw.trim());
    if title.is_empty() {
        return Err(FastfishError::InvalidArticle("title must not be empty".into()));
    }
    Ok(title.to_string())
}

fn strip_style_suffix(title: &str) -> &str {
    let Some(body) = title.strip_suffix(')') else {
        return title;
    };
    let Some(open) = body.rfind('(') else {
        return title;
    };
    let inner = &body[open + 1..];
    let Some(name) = inner.strip_suffix("样式") else {
        return title;
    };
    let trimmed = name.trim_end();
    let is_style_name = trimmed.len() < name.len()
        && !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if is_style_name {
        body[..open].trim_end()
    } else {
        title
    }
}

/// Unescape literal `\n`, `\r`, `\t` and refuse complete HTML documents.
pub fn clean_content(raw: &str, is_markdown: bool) -> Result<String> {
    let content = raw.trim();
    let content = if content.contains('\\') {
        content
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        content.to_string()
    };

    if !is_markdown && contains_document_markup(&content) {
        return Err(FastfishError::InvalidArticle(
            "content is a full HTML document (style/head); pass the markdown source instead".into(),
        ));
    }
    Ok(content)
}

fn contains_document_markup(content: &str) -> bool {
    let lower = content.to_lowercase();
    ["<style", "<head"].iter().any(|tag| {
        lower.match_indices(tag).any(|(idx, _)| {
            // Tag name must end here, so `<header>` is not a document head
            lower[idx + tag.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric())
        })
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;

    use super::*;
    use crate::domain::{LexiconCategory, LexiconEntry};
    use crate::lexicon::{LexiconSnapshot, SensitiveMatcher};
    use crate::store::SqliteStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn ingestor(words: &[&str]) -> (Arc<SqliteStore>, ArticleIngestor<SqliteStore>) {
        let entries = words
            .iter()
            .map(|w| LexiconEntry {
                word: w.to_string(),
                category: LexiconCategory::Political,
            })
            .collect();
        let matcher =
            SensitiveMatcher::build(&LexiconSnapshot::from_entries(PathBuf::from("mem"), entries));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let lexicon = Arc::new(LexiconHandle::from_matcher("mem", matcher));
        let ingestor = ArticleIngestor::new(store.clone(), lexicon, ScreeningPolicy::default());
        (store, ingestor)
    }

    fn request(title: &str, content: &str) -> IngestRequest {
        IngestRequest {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_title_strips_style_suffix() {
        assert_eq!(clean_title("  标题 (minimal 样式) ").unwrap(), "标题");
        assert_eq!(clean_title("Title (Tech-2 样式)").unwrap(), "Title");
        assert_eq!(clean_title("Title (not a style)").unwrap(), "Title (not a style)");
        assert_eq!(clean_title("Title (样式)").unwrap(), "Title (样式)");
        assert!(clean_title("   ").is_err());
        assert!(clean_title("(minimal 样式)").is_err());
    }

    #[test]
    fn test_clean_content_rules() {
        assert_eq!(clean_content("a\\nb\\tc", false).unwrap(), "a\nb\tc");
        assert!(clean_content("<html><head></head><body/></html>", false).is_err());
        assert!(clean_content("<STYLE>p{}</STYLE>", false).is_err());
        assert!(clean_content("<style>p{}</style>\n# title", true).is_ok());
        assert!(clean_content("<header>top</header>", false).is_ok());
    }

    #[test]
    fn test_ingest_writes_both_variants() {
        let (store, ingestor) = ingestor(&["示例违禁词"]);
        let outcome = ingestor
            .ingest_article(&request("Hello", "<p>clean</p>"), now())
            .unwrap();
        assert_eq!(outcome.status, ArticleStatus::Screened);
        assert!(outcome.compliance.performed);

        let raw = store
            .get_article(PoolVariant::Raw, outcome.raw_id)
            .unwrap()
            .unwrap();
        let rewritten = store
            .get_article(PoolVariant::Rewritten, outcome.article_id)
            .unwrap()
            .unwrap();
        assert_eq!(raw.title, "Hello");
        assert_eq!(rewritten.source_id, outcome.raw_id);
        assert_eq!(rewritten.status, ArticleStatus::Screened);
    }

    #[test]
    fn test_ingest_rejects_sensitive_content() {
        let (store, ingestor) = ingestor(&["示例违禁词"]);
        let outcome = ingestor
            .ingest_article(&request("标题", "这是一段含示例违禁词的文本"), now())
            .unwrap();
        assert_eq!(outcome.status, ArticleStatus::Rejected);
        assert!(!outcome.compliance.passed);

        // Rejected articles are never handed out
        let claimable = store
            .find_claimable(PoolVariant::Rewritten, &ArticleFilter::default(), now(), 10)
            .unwrap();
        assert!(claimable.is_empty());
    }

    #[test]
    fn test_available_skips_rejected_articles() {
        let (_store, ingestor) = ingestor(&["违禁"]);
        let rejected = ingestor
            .ingest_article(&request("含违禁标题", "<p>正文</p>"), now())
            .unwrap();
        assert_eq!(rejected.status, ArticleStatus::Rejected);
        let clean = ingestor
            .ingest_article(&request("干净标题", "<p>正文</p>"), now())
            .unwrap();

        let ids: Vec<i64> = ingestor
            .available(PoolVariant::Rewritten, 10)
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![clean.article_id]);
    }

    #[test]
    fn test_ingest_without_lexicon_is_screened_but_flagged() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let lexicon = Arc::new(LexiconHandle::from_matcher(
            "none",
            SensitiveMatcher::pass_through("no lexicon dir"),
        ));
        let ingestor = ArticleIngestor::new(store, lexicon, ScreeningPolicy::default());
        let outcome = ingestor
            .ingest_article(&request("t", "示例违禁词"), now())
            .unwrap();
        assert_eq!(outcome.status, ArticleStatus::Screened);
        assert!(!outcome.compliance.performed);

        // Unscreened rows are indistinguishable from screened ones once stored
        let available = ingestor.available(PoolVariant::Rewritten, 10).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, outcome.article_id);
    }

    #[test]
    fn test_ingest_batch_counts_failures() {
        let (_store, ingestor) = ingestor(&[]);
        let outcome = ingestor.ingest_batch(
            &[
                request("ok", "body"),
                request("", "body"),
                request("doc", "<head></head>"),
            ],
            now(),
        );
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.success_count, 1);
        assert!(!outcome.results[1].ok);
    }

    #[test]
    fn test_update_refused_after_publish() {
        let (store, ingestor) = ingestor(&["示例违禁词"]);
        let outcome = ingestor
            .ingest_article(&request("Hello", "body"), now())
            .unwrap();

        let edit = ArticleEdit {
            content: Some("这是一段含示例违禁词的文本".into()),
            ..Default::default()
        };
        let updated = ingestor
            .update_article(outcome.article_id, &edit, now())
            .unwrap();
        assert_eq!(updated.status, ArticleStatus::Rejected);
        let raw = store
            .get_article(PoolVariant::Raw, outcome.raw_id)
            .unwrap()
            .unwrap();
        assert_eq!(raw.status, ArticleStatus::Rejected);

        // Simulate a publish through the allocation path
        let article = store
            .get_article(PoolVariant::Rewritten, outcome.article_id)
            .unwrap()
            .unwrap();
        store
            .compare_and_set_allocation(
                PoolVariant::Rewritten,
                article.id,
                &crate::domain::AllocationGuard::of(&article),
                &crate::domain::AllocationChange::Consume { at: now() },
            )
            .unwrap();

        let err = ingestor
            .update_article(outcome.article_id, &edit, now())
            .unwrap_err();
        assert!(matches!(
            err,
            FastfishError::ArticleAlreadyPublished {
                published_count: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_available_lists_free_articles_with_summary() {
        let (_store, ingestor) = ingestor(&[]);
        let long_body = format!("<p>{}</p>", "字".repeat(150));
        ingestor
            .ingest_article(&request("Long", &long_body), now())
            .unwrap();
        let list = ingestor.available(PoolVariant::Rewritten, 50).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].summary.chars().count(), SUMMARY_CHARS + 3);
    }
}
