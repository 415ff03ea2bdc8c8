use html_escape::decode_html_entities;
use serde::Deserialize;
use serde_json::Value;

use crate::app::{FastfishError, Result};
use crate::domain::FetchedHotItem;

/// Envelope shared by every dailyhot endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn ensure_ok(&self) -> Result<()> {
        match self.code {
            Some(200) | Some(0) => Ok(()),
            code => Err(FastfishError::Other(format!(
                "Hot API returned code {:?}: {}",
                code,
                self.message.as_deref().unwrap_or("")
            ))),
        }
    }
}

/// Converts upstream hot-list payloads into domain items.
#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a ranked hot list. Entries without a title or link are dropped,
    /// rank is the 1-based position in the upstream list.
    pub fn normalize_items(&self, body: &[u8]) -> Result<Vec<FetchedHotItem>> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        envelope.ensure_ok()?;

        let entries = match envelope.data {
            Value::Array(entries) => entries,
            _ => return Ok(Vec::new()),
        };

        let items = entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let title = first_string(entry, &["title", "name"])?;
                let link = first_string(entry, &["mobileUrl", "url", "link"])?;
                Some(FetchedHotItem {
                    title: decode_html_entities(&title).trim().to_string(),
                    link,
                    desc: first_string(entry, &["desc"]).unwrap_or_default(),
                    hot_score: hot_score(entry),
                    rank: idx as i64 + 1,
                })
            })
            .collect();

        Ok(items)
    }

    /// Parse the platform list returned by the bare dailyhot endpoint.
    pub fn normalize_platforms(&self, body: &[u8]) -> Result<Vec<String>> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        envelope.ensure_ok()?;

        let platforms: Vec<String> = envelope
            .data
            .get("platforms")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(platforms)
    }
}

fn first_string(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn hot_score(entry: &Value) -> String {
    match entry.get("hot") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Reduce HTML to plain text: tags removed, entities decoded, whitespace
/// collapsed.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let decoded = decode_html_entities(&text);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
