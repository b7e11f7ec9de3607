// src/feed/atom.rs
//! Atom dialect, including the YouTube push-notification extensions
//! (`yt:videoId`, `yt:channelId`, `media:group`).

use quick_xml::de::from_str;
use serde::Deserialize;

use super::rss::{texts, MediaContent, Text};
use super::{dates::parse_date, html, Feed, FeedItem};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AtomDocument {
    title: Vec<Text>,
    subtitle: Vec<Text>,
    link: Vec<Link>,
    #[serde(rename = "entry")]
    entries: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: String,
}

/// `<content>` and `media:content` share a local name, so one shape holds both.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    #[serde(rename = "$text")]
    value: String,
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@medium")]
    medium: String,
    #[serde(rename = "@type")]
    mime: String,
}

impl Content {
    fn as_media(&self) -> MediaContent {
        MediaContent {
            url: self.url.clone(),
            medium: self.medium.clone(),
            mime: self.mime.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Person {
    name: Vec<Text>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
    #[serde(rename = "@label")]
    label: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    #[serde(rename = "@url")]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MediaGroup {
    #[serde(alias = "media:content")]
    content: Vec<Content>,
    #[serde(alias = "media:thumbnail")]
    thumbnail: Vec<Thumbnail>,
    #[serde(alias = "media:description")]
    description: Vec<Text>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entry {
    id: Vec<Text>,
    title: Vec<Text>,
    link: Vec<Link>,
    summary: Vec<Text>,
    #[serde(alias = "media:content")]
    content: Vec<Content>,
    published: Vec<Text>,
    updated: Vec<Text>,
    author: Vec<Person>,
    category: Vec<Category>,
    #[serde(rename = "videoId", alias = "yt:videoId")]
    video_id: Vec<Text>,
    #[serde(rename = "channelId", alias = "yt:channelId")]
    channel_id: Vec<Text>,
    #[serde(rename = "group", alias = "media:group")]
    media_group: Vec<MediaGroup>,
    #[serde(rename = "thumbnail", alias = "media:thumbnail")]
    thumbnail: Vec<Thumbnail>,
}

/// Entry view used by the YouTube push handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEntry {
    pub video_id: String,
    pub channel_id: String,
    pub link: String,
    pub title: String,
    pub author: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

impl AtomDocument {
    /// Parses a push or feed document. Anything that is not a titled
    /// `<feed>` is rejected.
    pub fn from_xml(xml: &str) -> Result<Self, String> {
        let xml = super::scrub_entities_for_xml(xml);
        let doc = Self::from_scrubbed(&xml)?;
        if texts(&doc.title).map(str::trim).unwrap_or_default().is_empty() {
            return Err("atom feed has no title".to_string());
        }
        Ok(doc)
    }

    fn from_scrubbed(xml: &str) -> Result<Self, String> {
        super::expect_root(xml, "feed")?;
        from_str(xml).map_err(|e| e.to_string())
    }

    pub fn video_entries(&self) -> Vec<VideoEntry> {
        self.entries
            .iter()
            .map(|e| VideoEntry {
                video_id: texts(&e.video_id).unwrap_or_default().to_string(),
                channel_id: texts(&e.channel_id).unwrap_or_default().to_string(),
                link: entry_link(&e.link).unwrap_or_default().to_string(),
                title: texts(&e.title).map(html::clean_text).unwrap_or_default(),
                author: author_of(e),
                published: texts(&e.published).map(str::to_string),
                updated: texts(&e.updated).map(str::to_string),
            })
            .collect()
    }
}

/// Prefers `rel="alternate"` (or no rel), then any link with an href.
fn entry_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| (l.rel.is_empty() || l.rel == "alternate") && !l.href.trim().is_empty())
        .or_else(|| links.iter().find(|l| !l.href.trim().is_empty()))
        .map(|l| l.href.trim())
}

fn author_of(e: &Entry) -> Option<String> {
    e.author
        .iter()
        .find_map(|p| texts(&p.name))
        .map(html::clean_text)
        .filter(|a| !a.is_empty())
}

/// Parses an Atom document; a feed without a title is rejected.
pub fn parse(xml: &str) -> Result<Feed, String> {
    let doc = AtomDocument::from_scrubbed(xml)?;

    let title = texts(&doc.title).map(html::clean_text).unwrap_or_default();
    if title.is_empty() {
        return Err("atom feed has no title".to_string());
    }

    let items = doc.entries.iter().filter_map(convert_entry).collect();

    Ok(Feed {
        title,
        link: entry_link(&doc.link).unwrap_or_default().to_string(),
        description: texts(&doc.subtitle).map(html::clean_text).unwrap_or_default(),
        items,
    })
}

fn convert_entry(e: &Entry) -> Option<FeedItem> {
    let link = entry_link(&e.link).unwrap_or_default().to_string();
    let id = texts(&e.id).map(str::to_string).unwrap_or_else(|| link.clone());
    if id.is_empty() {
        return None;
    }

    let raw_summary = texts(&e.summary)
        .or_else(|| e.media_group.iter().find_map(|g| texts(&g.description)))
        .unwrap_or_default();
    let raw_content = e
        .content
        .iter()
        .map(|c| c.value.trim())
        .find(|v| !v.is_empty());

    let description = html::clean_html(raw_summary);
    let content = raw_content
        .map(html::clean_html)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| description.clone());

    let categories = e
        .category
        .iter()
        .map(|c| if c.label.trim().is_empty() { &c.term } else { &c.label })
        .map(|c| html::clean_text(c))
        .filter(|c| !c.is_empty())
        .collect();

    Some(FeedItem {
        id,
        title: texts(&e.title).map(html::clean_text).unwrap_or_default(),
        description,
        content,
        link,
        author: author_of(e),
        categories,
        published_at: texts(&e.published).and_then(parse_date),
        updated_at: texts(&e.updated).and_then(parse_date),
        image_url: image_for(e, raw_content, raw_summary),
    })
}

/// Atom has no enclosures of its own: media:content first (top level, then
/// inside media:group), thumbnails next, then inline images.
fn image_for(e: &Entry, raw_content: Option<&str>, raw_summary: &str) -> Option<String> {
    let media = e
        .content
        .iter()
        .chain(e.media_group.iter().flat_map(|g| g.content.iter()))
        .find_map(|c| c.as_media().image_url().map(str::to_string));
    if media.is_some() {
        return media;
    }
    let thumb = e
        .thumbnail
        .iter()
        .chain(e.media_group.iter().flat_map(|g| g.thumbnail.iter()))
        .map(|t| t.url.trim())
        .find(|u| !u.is_empty());
    if let Some(url) = thumb {
        return Some(url.to_string());
    }
    raw_content
        .and_then(html::first_img_src)
        .or_else(|| html::first_img_src(raw_summary))
}
