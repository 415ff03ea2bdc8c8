use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A ranked entry as returned by an upstream hot list, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedHotItem {
    pub title: String,
    pub link: String,
    pub desc: String,
    pub hot_score: String,
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotRawItem {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub link: String,
    pub desc: String,
    pub hot_score: String,
    pub rank: i64,
    pub fetched_at: DateTime<Utc>,
}

impl HotRawItem {
    /// Deterministic key for `(source, title)` duplicate detection.
    pub fn dedup_key(source: &str, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(title.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Text the keyword policy is evaluated against.
    pub fn filter_text(&self) -> String {
        format!("{} {}", self.title, self.desc)
    }
}

/// Include/exclude keyword policy of a push category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl KeywordFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        let clean = |words: Vec<String>| -> Vec<String> {
            words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            include: clean(include),
            exclude: clean(exclude),
        }
    }

    /// Exclusion wins; an empty include list admits everything else.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        if self.exclude.iter().any(|kw| lower.contains(kw.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|kw| lower.contains(kw.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// How far back a previously stored item still counts as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyWindow {
    /// Since local midnight at the given UTC offset.
    CalendarDay { utc_offset_hours: i32 },
    Rolling(Duration),
}

impl RecencyWindow {
    /// Parse `"day"` or a rolling span such as `"12h"`, `"90m"`, `"2d"`.
    pub fn parse(s: &str, utc_offset_hours: i32) -> Result<Self, String> {
        let s = s.trim().to_lowercase();
        if s == "day" || s == "calendar-day" {
            return Ok(RecencyWindow::CalendarDay { utc_offset_hours });
        }
        parse_span(&s).map(RecencyWindow::Rolling)
    }

    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            RecencyWindow::CalendarDay { utc_offset_hours } => {
                let offset = local_offset(utc_offset_hours);
                let local = now.with_timezone(&offset);
                let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
                offset
                    .from_local_datetime(&midnight)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now)
            }
            RecencyWindow::Rolling(span) => span_start(now, span),
        }
    }
}

/// `now - span`, clamped to the earliest representable time.
pub fn span_start(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fixed offset for a whole-hour UTC shift; out-of-range values fall back to UTC.
pub fn local_offset(utc_offset_hours: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// Parse `"7d"`, `"12h"`, `"30m"`, `"45s"` or raw seconds.
pub fn parse_span(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s.as_str(), "s"),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("Invalid duration: {}. Use format like '1h', '30m', '1d'", s))?;
    let span = match unit {
        "d" => Duration::try_days(value),
        "h" => Duration::try_hours(value),
        "m" => Duration::try_minutes(value),
        "s" => Duration::try_seconds(value),
        _ => return Err(format!("Invalid duration unit in: {}", s)),
    };
    span.ok_or_else(|| format!("Duration out of range: {}", s))
}

/// Messaging channel a push config delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Feishu,
    DingTalk,
    Telegram,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Feishu => "feishu",
            ChannelKind::DingTalk => "dingtalk",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Webhook => "webhook",
        }
    }

    /// Maximum characters per delivered message.
    pub fn message_limit(self) -> usize {
        match self {
            ChannelKind::Telegram => 4096,
            ChannelKind::DingTalk => 5000,
            ChannelKind::Feishu => 10000,
            ChannelKind::Webhook => 10000,
        }
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feishu" | "lark" => Ok(ChannelKind::Feishu),
            "dingtalk" => Ok(ChannelKind::DingTalk),
            "telegram" => Ok(ChannelKind::Telegram),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(format!("Unsupported channel: {}", other)),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotPushConfig {
    pub id: i64,
    pub category_code: String,
    pub category_name: String,
    /// Empty means every source.
    pub sources: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    /// Comma separated `HH:MM` list.
    pub push_time: String,
    /// Stored verbatim so an unsupported value is reported at push time.
    pub channel: String,
    /// Webhook URL, or chat id for telegram.
    pub webhook: String,
    pub max_items: usize,
    pub is_active: bool,
}

impl HotPushConfig {
    pub fn keyword_filter(&self) -> KeywordFilter {
        KeywordFilter::new(self.include_keywords.clone(), self.exclude_keywords.clone())
    }

    pub fn push_times(&self) -> Vec<String> {
        self.push_time
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Whether `now` (shifted to the local offset) hits one of the push slots.
    pub fn is_due(&self, now: DateTime<Utc>, utc_offset_hours: i32) -> bool {
        let times = self.push_times();
        if times.is_empty() {
            return true;
        }
        let offset = local_offset(utc_offset_hours);
        let current = now.with_timezone(&offset).format("%H:%M").to_string();
        times.iter().any(|t| *t == current)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPushConfig {
    pub category_code: String,
    pub category_name: String,
    pub sources: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub push_time: String,
    pub channel: String,
    pub webhook: String,
    pub max_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Ok,
    Partial,
    Failed,
}

impl PushStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PushStatus::Ok => "ok",
            PushStatus::Partial => "partial",
            PushStatus::Failed => "failed",
        }
    }
}

impl FromStr for PushStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(PushStatus::Ok),
            "partial" => Ok(PushStatus::Partial),
            "failed" => Ok(PushStatus::Failed),
            other => Err(format!("Unknown push status: {}", other)),
        }
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotPushHistory {
    pub id: i64,
    pub config_id: i64,
    pub pushed_at: DateTime<Utc>,
    pub items_count: usize,
    pub item_ids: Vec<i64>,
    pub status: PushStatus,
    pub error_msg: Option<String>,
}
