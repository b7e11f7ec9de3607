// src/webhooks/reddit.rs
//! Reddit post notifications, gated by a static shared key header.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{header_str, DeliveryReport, GatewayState};
use crate::error::WebhookError;
use crate::event::{CanonicalIngestionEvent, SourceType, PRIORITY_PUSH};
use crate::signature;

const PLATFORM: &str = "reddit";
pub const KEY_HEADER: &str = "x-reddit-webhook-key";
const REDDIT_ORIGIN: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RedditBody {
    Many(Vec<RedditPost>),
    One(RedditPost),
}

impl RedditBody {
    fn into_posts(self) -> Vec<RedditPost> {
        match self {
            Self::Many(posts) => posts,
            Self::One(post) => vec![post],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    #[serde(default)]
    id: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    /// Link target for link posts; used only when there is no permalink.
    #[serde(default)]
    url: String,
}

fn authorize(headers: &HeaderMap, configured_key: &str) -> Result<(), WebhookError> {
    if configured_key.is_empty() {
        warn!(target: "webhook", platform = PLATFORM, "no webhook key configured; rejecting delivery");
    }
    let provided = header_str(headers, KEY_HEADER).unwrap_or_default();
    if signature::keys_match(provided.trim(), configured_key) {
        return Ok(());
    }
    counter!("webhook_unauthorized_total", "platform" => PLATFORM).increment(1);
    Err(WebhookError::Unauthorized(if provided.is_empty() {
        "missing webhook key"
    } else {
        "invalid webhook key"
    }))
}

pub async fn deliver(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryReport>, WebhookError> {
    counter!("webhook_requests_total", "platform" => PLATFORM).increment(1);
    authorize(&headers, &state.secrets.reddit_key)?;
    let tenant = state.tenant(&headers, &query)?;

    let posts = serde_json::from_slice::<RedditBody>(&body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid post payload: {e}")))?
        .into_posts();

    let events: Vec<_> = posts.iter().filter_map(|p| post_event(&tenant, p)).collect();
    debug!(target: "webhook", platform = PLATFORM, entries = posts.len(), events = events.len(), "parsed posts");

    state.deliver(PLATFORM, &tenant, &events, posts.len()).await
}

fn post_url(post: &RedditPost) -> Option<String> {
    let permalink = post.permalink.trim();
    if permalink.starts_with("http://") || permalink.starts_with("https://") {
        return Some(permalink.to_string());
    }
    if !permalink.is_empty() {
        let sep = if permalink.starts_with('/') { "" } else { "/" };
        return Some(format!("{REDDIT_ORIGIN}{sep}{permalink}"));
    }
    let url = post.url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

fn post_event(tenant_id: &str, post: &RedditPost) -> Option<CanonicalIngestionEvent> {
    let url = post_url(post)?;
    Some(
        CanonicalIngestionEvent::new(tenant_id, SourceType::Reddit, post.subreddit.trim(), url)
            .with_priority(PRIORITY_PUSH)
            .with_meta("post_id", post.id.trim())
            .with_meta("title", post.title.as_str())
            .with_meta("author", post.author.as_str())
            .with_meta("permalink", post.permalink.trim()),
    )
}
