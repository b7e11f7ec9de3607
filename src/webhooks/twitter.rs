// src/webhooks/twitter.rs
//! Twitter Account Activity webhooks: CRC challenge and tweet deliveries.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{check_signature, header_str, DeliveryReport, GatewayState};
use crate::error::WebhookError;
use crate::event::{CanonicalIngestionEvent, SourceType, PRIORITY_PUSH};
use crate::signature;

const PLATFORM: &str = "twitter";
pub const SIGNATURE_HEADER: &str = "x-twitter-webhooks-signature";

#[derive(Debug, Serialize)]
pub struct CrcResponse {
    pub response_token: String,
}

/// CRC challenge: answers with the keyed HMAC of `crc_token`.
pub async fn crc_check(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CrcResponse>, WebhookError> {
    let token = params
        .get("crc_token")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| WebhookError::BadRequest("crc_token is required".to_string()))?;

    if state.secrets.twitter.is_empty() {
        error!(target: "webhook", platform = PLATFORM, "CRC requested but no consumer secret is configured");
        return Err(WebhookError::Misconfigured("twitter consumer secret"));
    }

    Ok(Json(CrcResponse {
        response_token: signature::crc_response_token(token, &state.secrets.twitter),
    }))
}

#[derive(Debug, Deserialize)]
struct ActivityPayload {
    #[serde(default)]
    for_user_id: Option<String>,
    #[serde(default)]
    tweet_create_events: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    #[serde(default)]
    id_str: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    user: TwitterUser,
}

#[derive(Debug, Default, Deserialize)]
struct TwitterUser {
    #[serde(default)]
    screen_name: String,
}

impl Tweet {
    fn tweet_id(&self) -> Option<String> {
        let id = self.id_str.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
        self.id.map(|n| n.to_string())
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
        &state.secrets.twitter,
    )?;
    let tenant = state.tenant(&headers, &query)?;

    let payload: ActivityPayload = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid activity payload: {e}")))?;

    let entries = payload.tweet_create_events.len();
    let events: Vec<_> = payload
        .tweet_create_events
        .iter()
        .filter_map(|t| tweet_event(&tenant, t))
        .collect();
    debug!(
        target: "webhook",
        platform = PLATFORM,
        for_user_id = payload.for_user_id.as_deref().unwrap_or_default(),
        entries,
        events = events.len(),
        "parsed activity"
    );

    state.deliver(PLATFORM, &tenant, &events, entries).await
}

fn tweet_event(tenant_id: &str, tweet: &Tweet) -> Option<CanonicalIngestionEvent> {
    let id = tweet.tweet_id()?;
    let screen_name = tweet.user.screen_name.trim();
    let url = if screen_name.is_empty() {
        format!("https://twitter.com/i/web/status/{id}")
    } else {
        format!("https://twitter.com/{screen_name}/status/{id}")
    };
    let text = tweet.full_text.as_deref().unwrap_or(&tweet.text);

    Some(
        CanonicalIngestionEvent::new(tenant_id, SourceType::Twitter, screen_name, url)
            .with_priority(PRIORITY_PUSH)
            .with_meta("tweet_id", id)
            .with_meta("text", text)
            .with_meta("author", screen_name)
            .with_meta("created_at", tweet.created_at.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tweet_url_uses_screen_name() {
        let payload: ActivityPayload = serde_json::from_str(
            r#"{"for_user_id":"42","tweet_create_events":[
                {"id_str":"1001","text":"hello","created_at":"Wed Oct 10 20:19:24 +0000 2018","user":{"screen_name":"jack"}},
                {"text":"no id"},
                {"id":7,"text":"numeric id","user":{}}
            ]}"#,
        )
        .unwrap();

        let events: Vec<_> = payload
            .tweet_create_events
            .iter()
            .filter_map(|t| tweet_event("t1", t))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content_url, "https://twitter.com/jack/status/1001");
        assert_eq!(events[0].source_id, "jack");
        assert_eq!(events[0].metadata["text"], "hello");
        assert_eq!(events[1].content_url, "https://twitter.com/i/web/status/7");
    }
}
