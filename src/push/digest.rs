use chrono::{DateTime, Utc};

use crate::domain::hot::local_offset;
use crate::domain::HotRawItem;

/// One message worth of digest text and the items it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestChunk {
    pub text: String,
    pub item_ids: Vec<i64>,
}

pub fn header(category_name: &str, now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let date = now.with_timezone(&local_offset(utc_offset_hours)).format("%Y-%m-%d");
    format!("【{}】今日热点 {}", category_name, date)
}

fn entry(position: usize, item: &HotRawItem) -> String {
    let mut text = format!("{}. [{}] {}", position, item.source, item.title.trim());
    let link = item.link.trim();
    if !link.is_empty() {
        text.push_str("\n   ");
        text.push_str(link);
    }
    text
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Render `items` under `header`, split on entry boundaries so that no chunk
/// exceeds `limit` characters. Every chunk repeats the header.
pub fn build_chunks(header: &str, items: &[HotRawItem], limit: usize) -> Vec<DigestChunk> {
    const SEPARATOR: &str = "\n\n";

    let header = truncate_chars(header, limit);
    let room = limit.saturating_sub(char_len(&header) + SEPARATOR.len());

    let mut chunks = Vec::new();
    let mut text = header.clone();
    let mut used = char_len(&text);
    let mut ids = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let mut body = entry(idx + 1, item);
        if char_len(&body) > room {
            // A single oversize entry still goes out, cut to fit
            body = truncate_chars(&body, room);
        }
        let needed = SEPARATOR.len() + char_len(&body);
        if !ids.is_empty() && used + needed > limit {
            chunks.push(DigestChunk {
                text: std::mem::replace(&mut text, header.clone()),
                item_ids: std::mem::take(&mut ids),
            });
            used = char_len(&header);
        }
        text.push_str(SEPARATOR);
        text.push_str(&body);
        used += needed;
        ids.push(item.id);
    }

    if !ids.is_empty() {
        chunks.push(DigestChunk {
            text,
            item_ids: ids,
        });
    }
    chunks
}
