// src/feed/dates.rs
//! Feed date parsing as an ordered cascade of layouts.
//!
//! Layouts are tried strictly in declaration order; the first one that parses
//! wins. Leading weekday names are ignored, as feeds frequently get them wrong.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// Numeric offset at the end (`-0700`).
    Zoned(&'static str),
    /// Zone abbreviation at the end (`GMT`, `EST`, ...).
    Abbreviated(&'static str),
    Rfc3339,
    /// No zone information, interpreted as UTC.
    Naive(&'static str),
    DateOnly(&'static str),
}

const CASCADE: [Layout; 12] = [
    // RFC1123Z
    Layout::Zoned("%d %b %Y %H:%M:%S %z"),
    // RFC1123
    Layout::Abbreviated("%d %b %Y %H:%M:%S"),
    // RFC822Z
    Layout::Zoned("%d %b %y %H:%M %z"),
    // RFC822
    Layout::Abbreviated("%d %b %y %H:%M"),
    Layout::Rfc3339,
    Layout::Zoned("%Y-%m-%dT%H:%M:%S%z"),
    Layout::Zoned("%Y-%m-%d %H:%M:%S %z"),
    Layout::Naive("%Y-%m-%dT%H:%M:%S"),
    Layout::Naive("%Y-%m-%d %H:%M:%S"),
    Layout::Naive("%d %b %Y %H:%M:%S"),
    Layout::Zoned("%d %b %Y %H:%M %z"),
    Layout::DateOnly("%Y-%m-%d"),
];

const ZONE_ABBREVIATIONS: [(&str, i32); 12] = [
    ("GMT", 0),
    ("UTC", 0),
    ("UT", 0),
    ("Z", 0),
    ("EST", -5),
    ("EDT", -4),
    ("CST", -6),
    ("CDT", -5),
    ("MST", -7),
    ("MDT", -6),
    ("PST", -8),
    ("PDT", -7),
];

impl Layout {
    fn parse(self, s: &str) -> Option<DateTime<Utc>> {
        match self {
            Layout::Zoned(fmt) => DateTime::parse_from_str(s, fmt)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Layout::Abbreviated(fmt) => {
                let (head, zone) = s.rsplit_once(' ')?;
                let offset = zone_offset(zone)?;
                let naive = NaiveDateTime::parse_from_str(head, fmt).ok()?;
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Layout::Naive(fmt) => NaiveDateTime::parse_from_str(s, fmt)
                .ok()
                .map(|naive| naive.and_utc()),
            Layout::DateOnly(fmt) => NaiveDate::parse_from_str(s, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
        }
    }
}

/// Known abbreviations map to their offsets; other alphabetic zones are
/// taken as UTC.
fn zone_offset(zone: &str) -> Option<FixedOffset> {
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let hours = ZONE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
        .map(|(_, h)| *h)
        .unwrap_or(0);
    FixedOffset::east_opt(hours * 3600)
}

fn strip_weekday(s: &str) -> &str {
    match s.split_once(',') {
        Some((day, rest)) if day.len() <= 9 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => s,
    }
}

/// Parses a feed timestamp, returning `None` when no layout matches.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    let s = strip_weekday(&collapsed);
    CASCADE.iter().find_map(|layout| layout.parse(s))
}
