use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use tracing::warn;

use crate::domain::{LexiconCategory, LexiconEntry, MatchHit, MatchResult};
use crate::lexicon::{LexiconSnapshot, LexiconStatus};

/// Multi-pattern scanner over every lexicon category at once.
///
/// Built once per snapshot and never mutated; a matcher without an automaton
/// passes every text through unscreened.
#[derive(Debug)]
pub struct SensitiveMatcher {
    automaton: Option<AhoCorasick>,
    entries: Vec<LexiconEntry>,
    status: LexiconStatus,
}

impl SensitiveMatcher {
    pub fn build(snapshot: &LexiconSnapshot) -> Self {
        if snapshot.entries.is_empty() {
            let reason = match &snapshot.status {
                LexiconStatus::Unavailable { reason } => reason.clone(),
                LexiconStatus::Loaded { .. } => "lexicon is empty".to_string(),
            };
            warn!("Sensitive-word screening disabled: {}", reason);
            return Self::pass_through(reason);
        }

        let patterns: Vec<&str> = snapshot.entries.iter().map(|e| e.word.as_str()).collect();
        // Standard semantics are required for overlapping iteration
        match AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&patterns)
        {
            Ok(automaton) => Self {
                automaton: Some(automaton),
                entries: snapshot.entries.clone(),
                status: snapshot.status.clone(),
            },
            Err(e) => {
                warn!("Failed to build lexicon automaton: {}", e);
                Self::pass_through(format!("automaton build failed: {}", e))
            }
        }
    }

    pub fn pass_through(reason: impl Into<String>) -> Self {
        Self {
            automaton: None,
            entries: Vec::new(),
            status: LexiconStatus::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// False when scans are pass-through.
    pub fn is_screening(&self) -> bool {
        self.automaton.is_some()
    }

    pub fn status(&self) -> &LexiconStatus {
        &self.status
    }

    pub fn word_count(&self) -> usize {
        self.entries.len()
    }

    /// Report every occurrence of every lexicon word, overlaps included,
    /// ordered by position then by word length.
    pub fn scan(&self, text: &str) -> MatchResult {
        let automaton = match &self.automaton {
            Some(automaton) => automaton,
            None => return MatchResult::unscreened(),
        };

        let mut spans: Vec<(usize, usize, usize)> = automaton
            .find_overlapping_iter(text)
            .map(|m| (m.start(), m.end(), m.pattern().as_usize()))
            .collect();
        spans.sort_unstable();

        // Byte offsets to char offsets in one forward pass over sorted starts
        let mut hits = Vec::with_capacity(spans.len());
        let mut byte_cursor = 0;
        let mut char_cursor = 0;
        for (start, _end, pattern) in spans {
            char_cursor += text[byte_cursor..start].chars().count();
            byte_cursor = start;
            let entry = &self.entries[pattern];
            hits.push(MatchHit {
                word: entry.word.clone(),
                category: entry.category,
                position: char_cursor,
            });
        }

        MatchResult {
            matched: !hits.is_empty(),
            hits,
            screened: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn matcher(words: &[(&str, LexiconCategory)]) -> SensitiveMatcher {
        let entries = words
            .iter()
            .map(|(word, category)| LexiconEntry {
                word: word.to_string(),
                category: *category,
            })
            .collect();
        SensitiveMatcher::build(&LexiconSnapshot::from_entries(PathBuf::from("mem"), entries))
    }

    #[test]
    fn test_scan_reports_political_hit_with_char_position() {
        let m = matcher(&[("示例违禁词", LexiconCategory::Political)]);
        let result = m.scan("这是一段含示例违禁词的文本");

        assert!(result.matched);
        assert!(result.screened);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].word, "示例违禁词");
        assert_eq!(result.hits[0].category, LexiconCategory::Political);
        assert_eq!(result.hits[0].position, 5);
    }

    #[test]
    fn test_scan_reports_overlapping_hits_across_categories() {
        let m = matcher(&[
            ("abc", LexiconCategory::Ad),
            ("bcd", LexiconCategory::Porn),
            ("b", LexiconCategory::Other),
        ]);
        let result = m.scan("xabcd");

        let found: Vec<(&str, usize)> = result
            .hits
            .iter()
            .map(|h| (h.word.as_str(), h.position))
            .collect();
        assert_eq!(found, vec![("abc", 1), ("b", 2), ("bcd", 2)]);
        assert_eq!(result.hits[2].category, LexiconCategory::Porn);
    }

    #[test]
    fn test_scan_repeated_occurrences() {
        let m = matcher(&[("词", LexiconCategory::Other)]);
        let result = m.scan("词a词");
        let positions: Vec<usize> = result.hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let m = matcher(&[
            ("foo", LexiconCategory::Ad),
            ("oob", LexiconCategory::Political),
        ]);
        let text = "foobar and foo again";
        assert_eq!(m.scan(text), m.scan(text));
    }

    #[test]
    fn test_clean_text_is_screened_without_hits() {
        let m = matcher(&[("foo", LexiconCategory::Ad)]);
        let result = m.scan("nothing to see");
        assert!(!result.matched);
        assert!(result.screened);
        assert!(result.hits.is_empty());
    }

    #[test]
    fn test_empty_lexicon_is_pass_through() {
        let m = matcher(&[]);
        assert!(!m.is_screening());
        let result = m.scan("anything at all");
        assert!(!result.matched);
        assert!(!result.screened);
        assert!(matches!(m.status(), LexiconStatus::Unavailable { .. }));
    }
}
