use serde::Serialize;

use crate::domain::{LexiconCategory, MatchHit};
use crate::lexicon::{LexiconStatus, SensitiveMatcher};
use crate::normalizer::strip_html;

const PREVIEW_WORDS: usize = 5;

/// Which categories make a text non-compliant.
#[derive(Debug, Clone)]
pub struct ScreeningPolicy {
    pub blocking: Vec<LexiconCategory>,
}

impl Default for ScreeningPolicy {
    fn default() -> Self {
        Self {
            blocking: LexiconCategory::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitLocation {
    Title,
    Content,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocatedHit {
    #[serde(flatten)]
    pub hit: MatchHit,
    pub location: HitLocation,
}

/// Outcome of screening an article's title and body.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub passed: bool,
    /// False when no lexicon was loaded.
    pub performed: bool,
    pub skipped_reason: Option<String>,
    pub failed_categories: Vec<LexiconCategory>,
    pub hits: Vec<LocatedHit>,
    pub message: String,
}

impl ComplianceReport {
    pub fn summary(&self) -> String {
        match (self.performed, self.passed) {
            (false, _) => format!(
                "Sensitive-word screening skipped: {}",
                self.skipped_reason.as_deref().unwrap_or("no lexicon")
            ),
            (true, true) => "Sensitive-word screening passed".to_string(),
            (true, false) => format!("Sensitive-word screening failed: {}", self.message),
        }
    }
}

/// Screen a title and an HTML or plain-text body.
pub fn check(
    matcher: &SensitiveMatcher,
    policy: &ScreeningPolicy,
    title: &str,
    content: &str,
) -> ComplianceReport {
    if !matcher.is_screening() {
        let reason = match matcher.status() {
            LexiconStatus::Unavailable { reason } => reason.clone(),
            LexiconStatus::Loaded { .. } => "lexicon is empty".to_string(),
        };
        return ComplianceReport {
            passed: true,
            performed: false,
            skipped_reason: Some(reason),
            failed_categories: Vec::new(),
            hits: Vec::new(),
            message: String::new(),
        };
    }

    let title_result = matcher.scan(title.trim());
    let content_result = matcher.scan(&strip_html(content));

    let hits: Vec<LocatedHit> = title_result
        .hits
        .into_iter()
        .map(|hit| LocatedHit {
            hit,
            location: HitLocation::Title,
        })
        .chain(content_result.hits.into_iter().map(|hit| LocatedHit {
            hit,
            location: HitLocation::Content,
        }))
        .filter(|located| policy.blocking.contains(&located.hit.category))
        .collect();

    let mut failed_categories = Vec::new();
    for located in &hits {
        if !failed_categories.contains(&located.hit.category) {
            failed_categories.push(located.hit.category);
        }
    }

    let message = if hits.is_empty() {
        String::new()
    } else {
        let labels: Vec<&str> = failed_categories.iter().map(|c| c.label()).collect();
        let mut preview: Vec<&str> = hits
            .iter()
            .take(PREVIEW_WORDS)
            .map(|h| h.hit.word.as_str())
            .collect();
        if hits.len() > PREVIEW_WORDS {
            preview.push("...");
        }
        format!(
            "Content contains sensitive words in: {}; e.g. {}",
            labels.join(", "),
            preview.join(", ")
        )
    };

    ComplianceReport {
        passed: hits.is_empty(),
        performed: true,
        skipped_reason: None,
        failed_categories,
        hits,
        message,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::LexiconEntry;
    use crate::lexicon::LexiconSnapshot;

    fn matcher() -> SensitiveMatcher {
        let entries = vec![
            LexiconEntry {
                word: "示例违禁词".into(),
                category: LexiconCategory::Political,
            },
            LexiconEntry {
                word: "加微信".into(),
                category: LexiconCategory::Ad,
            },
        ];
        SensitiveMatcher::build(&LexiconSnapshot::from_entries(PathBuf::from("mem"), entries))
    }

    #[test]
    fn test_check_reports_title_and_content_hits() {
        let report = check(
            &matcher(),
            &ScreeningPolicy::default(),
            "标题加微信",
            "<p>正文<b>示例违禁词</b></p>",
        );
        assert!(!report.passed);
        assert!(report.performed);
        assert_eq!(report.hits.len(), 2);
        assert_eq!(report.hits[0].location, HitLocation::Title);
        assert_eq!(report.hits[1].location, HitLocation::Content);
        assert_eq!(
            report.failed_categories,
            vec![LexiconCategory::Ad, LexiconCategory::Political]
        );
        assert!(report.message.contains("加微信"));
        assert!(report.summary().contains("failed"));
    }

    #[test]
    fn test_check_ignores_non_blocking_categories() {
        let policy = ScreeningPolicy {
            blocking: vec![LexiconCategory::Political],
        };
        let report = check(&matcher(), &policy, "加微信", "clean body");
        assert!(report.passed);
        assert!(report.hits.is_empty());
    }

    #[test]
    fn test_check_without_lexicon_is_skipped() {
        let report = check(
            &SensitiveMatcher::pass_through("missing dir"),
            &ScreeningPolicy::default(),
            "示例违禁词",
            "",
        );
        assert!(report.passed);
        assert!(!report.performed);
        assert_eq!(report.skipped_reason.as_deref(), Some("missing dir"));
        assert!(report.summary().contains("skipped"));
    }

    #[test]
    fn test_message_preview_is_capped() {
        let body = "加微信 ".repeat(7);
        let report = check(&matcher(), &ScreeningPolicy::default(), "", &body);
        assert_eq!(report.hits.len(), 7);
        assert!(report.message.ends_with("..."));
    }
}
