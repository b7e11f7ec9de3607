// src/feed/rss.rs
//! RSS 2.0 dialect.
//!
//! Namespaced extensions are matched both by local name and by their usual
//! prefixed name, and every repeatable element is collected as a list so that
//! prefixed twins (`atom:link`, `media:title`) never clash with the core ones.

use quick_xml::de::from_str;
use serde::Deserialize;

use super::{dates::parse_date, first_non_empty, html, Feed, FeedItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Channel {
    title: Vec<Text>,
    link: Vec<Text>,
    description: Vec<Text>,
    #[serde(rename = "item")]
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Text {
    #[serde(rename = "$text")]
    pub(crate) value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Item {
    title: Vec<Text>,
    link: Vec<Text>,
    description: Vec<Text>,
    guid: Vec<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Vec<Text>,
    author: Vec<Text>,
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Vec<Text>,
    category: Vec<Text>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    encoded: Vec<Text>,
    enclosure: Vec<Enclosure>,
    #[serde(rename = "content", alias = "media:content")]
    media_content: Vec<MediaContent>,
    #[serde(rename = "updated", alias = "atom:updated")]
    updated: Vec<Text>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type")]
    mime: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MediaContent {
    #[serde(rename = "@url")]
    pub(crate) url: String,
    #[serde(rename = "@medium")]
    pub(crate) medium: String,
    #[serde(rename = "@type")]
    pub(crate) mime: String,
}

impl MediaContent {
    pub(crate) fn image_url(&self) -> Option<&str> {
        let url = self.url.trim();
        let is_image = self.medium.eq_ignore_ascii_case("image")
            || self.mime.to_ascii_lowercase().starts_with("image/")
            || html::looks_like_image_url(url);
        (is_image && !url.is_empty()).then_some(url)
    }
}

pub(crate) fn texts(v: &[Text]) -> Option<&str> {
    first_non_empty(v.iter().map(|t| t.value.as_str()))
}

/// Parses an RSS 2.0 document; a channel without a title is rejected.
pub fn parse(xml: &str) -> Result<Feed, String> {
    super::expect_root(xml, "rss")?;
    let rss: Rss = from_str(xml).map_err(|e| e.to_string())?;
    let channel = rss.channel;

    let title = texts(&channel.title).map(html::clean_text).unwrap_or_default();
    if title.is_empty() {
        return Err("rss channel has no title".to_string());
    }

    let items = channel.items.into_iter().filter_map(convert_item).collect();

    Ok(Feed {
        title,
        link: texts(&channel.link).unwrap_or_default().to_string(),
        description: texts(&channel.description)
            .map(html::clean_text)
            .unwrap_or_default(),
        items,
    })
}

fn convert_item(it: Item) -> Option<FeedItem> {
    let link = texts(&it.link).unwrap_or_default().to_string();
    let id = texts(&it.guid).map(str::to_string).unwrap_or_else(|| link.clone());
    if id.is_empty() {
        return None;
    }

    let raw_description = texts(&it.description).unwrap_or_default();
    let raw_content = texts(&it.encoded);

    let image_url = image_for(&it, raw_content, raw_description);

    let description = html::clean_html(raw_description);
    let content = raw_content
        .map(html::clean_html)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| description.clone());

    let author = texts(&it.author)
        .or_else(|| texts(&it.creator))
        .map(html::clean_text)
        .filter(|a| !a.is_empty());

    let categories = it
        .category
        .iter()
        .map(|c| html::clean_text(&c.value))
        .filter(|c| !c.is_empty())
        .collect();

    Some(FeedItem {
        id,
        title: texts(&it.title).map(html::clean_text).unwrap_or_default(),
        description,
        content,
        link,
        author,
        categories,
        published_at: texts(&it.pub_date).and_then(parse_date),
        updated_at: texts(&it.updated).and_then(parse_date),
        image_url,
    })
}

/// Enclosure, then media:content, then the body's first `<img>`, then the
/// description's.
fn image_for(it: &Item, raw_content: Option<&str>, raw_description: &str) -> Option<String> {
    let from_enclosure = it.enclosure.iter().find_map(|e| {
        let url = e.url.trim();
        (e.mime.to_ascii_lowercase().starts_with("image/") && !url.is_empty()).then_some(url)
    });
    if let Some(url) = from_enclosure {
        return Some(url.to_string());
    }
    if let Some(url) = it.media_content.iter().find_map(MediaContent::image_url) {
        return Some(url.to_string());
    }
    raw_content
        .and_then(html::first_img_src)
        .or_else(|| html::first_img_src(raw_description))
}
