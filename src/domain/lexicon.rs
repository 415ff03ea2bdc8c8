use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lexicon category. Declaration order decides which category keeps a word
/// listed in more than one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LexiconCategory {
    Ad,
    Porn,
    Political,
    Reactionary,
    Supplementary,
    Other,
}

impl LexiconCategory {
    pub const ALL: [LexiconCategory; 6] = [
        LexiconCategory::Ad,
        LexiconCategory::Porn,
        LexiconCategory::Political,
        LexiconCategory::Reactionary,
        LexiconCategory::Supplementary,
        LexiconCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LexiconCategory::Ad => "ad",
            LexiconCategory::Porn => "porn",
            LexiconCategory::Political => "political",
            LexiconCategory::Reactionary => "reactionary",
            LexiconCategory::Supplementary => "supplementary",
            LexiconCategory::Other => "other",
        }
    }

    /// Human-readable label used in compliance messages.
    pub fn label(self) -> &'static str {
        match self {
            LexiconCategory::Ad => "广告垃圾",
            LexiconCategory::Porn => "色情垃圾",
            LexiconCategory::Political => "违禁涉政",
            LexiconCategory::Reactionary => "反动言论",
            LexiconCategory::Supplementary => "谩骂灌水",
            LexiconCategory::Other => "其他",
        }
    }

    /// Map a lexicon file stem to its category.
    ///
    /// Accepts the english category names as well as the file names used by
    /// the public Sensitive-lexicon word lists.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        match stem.trim() {
            "广告类型" => Some(LexiconCategory::Ad),
            "色情类型" | "色情词库" => Some(LexiconCategory::Porn),
            "政治类型" => Some(LexiconCategory::Political),
            "反动词库" => Some(LexiconCategory::Reactionary),
            "补充词库" => Some(LexiconCategory::Supplementary),
            "其他词库" => Some(LexiconCategory::Other),
            other => other.parse().ok(),
        }
    }
}

impl FromStr for LexiconCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ad" => Ok(LexiconCategory::Ad),
            "porn" => Ok(LexiconCategory::Porn),
            "political" => Ok(LexiconCategory::Political),
            "reactionary" => Ok(LexiconCategory::Reactionary),
            "supplementary" => Ok(LexiconCategory::Supplementary),
            "other" => Ok(LexiconCategory::Other),
            other => Err(format!("Unknown lexicon category: {}", other)),
        }
    }
}

impl fmt::Display for LexiconCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub word: String,
    pub category: LexiconCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHit {
    pub word: String,
    pub category: LexiconCategory,
    /// Character index of the first matched character.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub hits: Vec<MatchHit>,
    /// False when no lexicon was loaded and the text went unscreened.
    pub screened: bool,
}

impl MatchResult {
    pub fn unscreened() -> Self {
        Self {
            matched: false,
            hits: Vec::new(),
            screened: false,
        }
    }
}
