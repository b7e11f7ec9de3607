// src/feed/mod.rs
//! Feed normalization: RSS 2.0 and Atom documents parsed into one `Feed` shape.

pub mod atom;
pub mod dates;
pub mod html;
pub mod rss;

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::error::FeedError;

/// One syndication entry, whichever dialect it came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FeedItem {
    /// GUID/Atom id, or the link when the document has none. Never empty.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Full body; equals `description` when the entry has no separate body.
    pub content: String,
    pub link: String,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Document order, never re-sorted.
    pub items: Vec<FeedItem>,
}

impl Feed {
    /// Keeps items published at or after `cutoff`. Undated items are dropped.
    pub fn since(mut self, cutoff: DateTime<Utc>) -> Self {
        self.items = filter_since(self.items, cutoff);
        self
    }
}

pub fn filter_since(items: Vec<FeedItem>, cutoff: DateTime<Utc>) -> Vec<FeedItem> {
    items
        .into_iter()
        .filter(|it| it.published_at.is_some_and(|p| p >= cutoff))
        .collect()
}

type DialectParser = fn(&str) -> Result<Feed, String>;

/// Dialects in the order they are attempted.
const DIALECTS: [(&str, DialectParser); 2] = [("rss", rss::parse), ("atom", atom::parse)];

/// Parses raw feed bytes, trying RSS 2.0 first and Atom second.
pub fn parse_feed(raw: &[u8]) -> Result<Feed, FeedError> {
    let t0 = std::time::Instant::now();
    let text = decode_document(raw);
    let xml = scrub_entities_for_xml(&text);

    let mut errors: Vec<String> = Vec::with_capacity(DIALECTS.len());
    for (name, parse) in DIALECTS {
        match parse(&xml) {
            Ok(feed) => {
                histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                counter!("feed_items_total").increment(feed.items.len() as u64);
                tracing::debug!(target: "feed", dialect = name, items = feed.items.len(), "parsed feed");
                return Ok(feed);
            }
            Err(e) => errors.push(e),
        }
    }

    let atom = errors.pop().unwrap_or_default();
    let rss = errors.pop().unwrap_or_default();
    Err(FeedError::Unrecognized { rss, atom })
}

/// Windows-1252 assignments for 0x80..=0x9F; the five unassigned bytes keep
/// their Latin-1 code points.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}', '\u{17D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}', '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
];

/// Bytes to text: UTF-8 when valid, Windows-1252 when the declaration names
/// it or Latin-1 (feeds labelled Latin-1 are routinely cp1252), lossy UTF-8
/// otherwise. A leading BOM is dropped.
fn decode_document(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let head = String::from_utf8_lossy(&raw[..raw.len().min(200)]).to_ascii_lowercase();
            if head.contains("iso-8859-1") || head.contains("latin1") || head.contains("windows-1252") {
                Cow::Owned(raw.iter().map(|&b| cp1252_char(b)).collect())
            } else {
                String::from_utf8_lossy(raw)
            }
        }
    }
}

fn cp1252_char(b: u8) -> char {
    match b {
        0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
        _ => char::from(b),
    }
}

/// Local name of the document element, if the text has one.
pub(crate) fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Serde ignores the document element's name, so dialects check it first.
pub(crate) fn expect_root(xml: &str, name: &str) -> Result<(), String> {
    match root_element(xml) {
        Some(root) if root == name => Ok(()),
        Some(root) => Err(format!("document element is <{root}>, expected <{name}>")),
        None => Err("document has no root element".to_string()),
    }
}

const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// Makes HTML-flavoured XML palatable to a strict parser: named HTML entities
/// are decoded to characters and stray ampersands are escaped.
pub(crate) fn scrub_entities_for_xml(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let entity_len = tail[1..]
            .find(';')
            .filter(|&n| n > 0 && n <= 32)
            .map(|n| n + 2);
        match entity_len {
            Some(len) if is_entity_name(&tail[1..len - 1]) => {
                let name = &tail[1..len - 1];
                if name.starts_with('#') || XML_ENTITIES.contains(&name) {
                    out.push_str(&tail[..len]);
                } else {
                    let decoded = html_escape::decode_html_entities(&tail[..len]);
                    if decoded == tail[..len] {
                        out.push_str("&amp;");
                        out.push_str(&tail[1..len]);
                    } else {
                        out.push_str(&decoded);
                    }
                }
                rest = &tail[len..];
            }
            _ => {
                out.push_str("&amp;");
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn is_entity_name(name: &str) -> bool {
    if let Some(num) = name.strip_prefix('#') {
        return match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        };
    }
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// First non-empty trimmed value.
pub(crate) fn first_non_empty<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().map(str::trim).find(|s| !s.is_empty())
}
