// src/webhooks/youtube.rs
//! YouTube PubSubHubbub push: hub verification and Atom deliveries.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use tracing::{debug, info};

use super::{check_signature, header_str, DeliveryReport, GatewayState};
use crate::error::WebhookError;
use crate::event::{CanonicalIngestionEvent, SourceType, PRIORITY_PUSH};
use crate::feed::atom::{AtomDocument, VideoEntry};

const PLATFORM: &str = "youtube";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Hub verification of a (un)subscription: echo the challenge verbatim.
pub async fn handshake(Query(params): Query<HashMap<String, String>>) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or_default();
    match mode {
        "subscribe" | "unsubscribe" => {
            let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
            info!(
                target: "webhook",
                platform = PLATFORM,
                mode,
                topic = params.get("hub.topic").map(String::as_str).unwrap_or_default(),
                "hub verification accepted"
            );
            (StatusCode::OK, challenge).into_response()
        }
        _ => WebhookError::BadRequest(format!("unsupported hub.mode '{mode}'")).into_response(),
    }
}

pub async fn deliver(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryReport>, WebhookError> {
    counter!("webhook_requests_total", "platform" => PLATFORM).increment(1);
    check_signature(
        PLATFORM,
        &body,
        header_str(&headers, SIGNATURE_HEADER),
        &state.secrets.youtube,
    )?;
    let tenant = state.tenant(&headers, &query)?;

    let xml = std::str::from_utf8(&body)
        .map_err(|_| WebhookError::BadRequest("body is not valid UTF-8".to_string()))?;
    let doc = AtomDocument::from_xml(xml)
        .map_err(|e| WebhookError::BadRequest(format!("invalid Atom payload: {e}")))?;

    let entries = doc.video_entries();
    let events: Vec<_> = entries
        .iter()
        .filter_map(|entry| video_event(&tenant, entry))
        .collect();
    debug!(target: "webhook", platform = PLATFORM, entries = entries.len(), events = events.len(), "parsed push");

    state.deliver(PLATFORM, &tenant, &events, entries.len()).await
}

/// Entry link, or the watch URL built from the video id.
fn video_url(entry: &VideoEntry) -> Option<String> {
    if !entry.link.trim().is_empty() {
        return Some(entry.link.trim().to_string());
    }
    let id = entry.video_id.trim();
    (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={id}"))
}

pub(crate) fn video_event(tenant_id: &str, entry: &VideoEntry) -> Option<CanonicalIngestionEvent> {
    let url = video_url(entry)?;
    let mut ev = CanonicalIngestionEvent::new(tenant_id, SourceType::Youtube, entry.channel_id.trim(), url)
        .with_priority(PRIORITY_PUSH)
        .with_meta("video_id", entry.video_id.trim())
        .with_meta("title", entry.title.as_str());
    if let Some(author) = &entry.author {
        ev = ev.with_meta("author", author.as_str());
    }
    if let Some(published) = &entry.published {
        ev = ev.with_meta("published", published.as_str());
    }
    if let Some(updated) = &entry.updated {
        ev = ev.with_meta("updated", updated.as_str());
    }
    Some(ev)
}
