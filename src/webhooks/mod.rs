// src/webhooks/mod.rs
//! Platform push endpoints.
//!
//! Each platform exposes a handshake (GET) and a delivery (POST). Deliveries
//! are authenticated, parsed into canonical events and published with
//! continue-on-error batch semantics.

pub mod reddit;
pub mod twitter;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::WebhookError;
use crate::event::CanonicalIngestionEvent;
use crate::publish::{publish_all_until, BatchOutcome, SharedPublisher};
use crate::signature;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TENANT_QUERY: &str = "tenant_id";

/// Upper bound on the time one delivery spends publishing.
pub const DEFAULT_DELIVERY_DEADLINE: Duration = Duration::from_secs(30);

/// Shared secrets per platform. An empty value disables verification for
/// that platform (Reddit excepted: an empty key rejects every delivery).
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub youtube: String,
    pub twitter: String,
    pub reddit_key: String,
}

#[derive(Clone)]
pub struct GatewayState {
    pub publisher: SharedPublisher,
    pub secrets: Arc<WebhookSecrets>,
    pub default_tenant: Option<String>,
    pub deadline: Duration,
}

impl GatewayState {
    pub fn new(publisher: SharedPublisher, secrets: WebhookSecrets) -> Self {
        Self {
            publisher,
            secrets: Arc::new(secrets),
            default_tenant: None,
            deadline: DEFAULT_DELIVERY_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_default_tenant(mut self, tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        self.default_tenant = (!tenant.trim().is_empty()).then_some(tenant);
        self
    }

    pub fn tenant(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<String, WebhookError> {
        resolve_tenant(headers, query, self.default_tenant.as_deref())
    }

    /// Publishes a parsed batch within the delivery deadline and turns the
    /// outcome into a response.
    pub async fn deliver(
        &self,
        platform: &'static str,
        tenant_id: &str,
        events: &[CanonicalIngestionEvent],
        entries: usize,
    ) -> Result<Json<DeliveryReport>, WebhookError> {
        let deadline = tokio::time::Instant::now() + self.deadline;
        let outcome = publish_all_until(self.publisher.as_ref(), events, entries, deadline).await;
        delivery_response(platform, tenant_id, outcome)
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(
            "/webhooks/youtube",
            get(youtube::handshake).post(youtube::deliver),
        )
        .route(
            "/webhooks/twitter",
            get(twitter::crc_check).post(twitter::deliver),
        )
        .route("/webhooks/reddit", post(reddit::deliver))
        .with_state(state)
}

/// `X-Tenant-ID` header, then `tenant_id` query parameter, then the default.
pub fn resolve_tenant(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    default_tenant: Option<&str>,
) -> Result<String, WebhookError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| query.get(TENANT_QUERY).map(String::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(default_tenant)
        .map(str::to_string)
        .ok_or_else(|| WebhookError::BadRequest("tenant id is required".to_string()))
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// HMAC check for signed platforms. With no secret configured the delivery is
/// let through and logged as unverified.
pub(crate) fn check_signature(
    platform: &'static str,
    body: &[u8],
    header: Option<&str>,
    secret: &str,
) -> Result<(), WebhookError> {
    if secret.is_empty() {
        warn!(target: "webhook", platform, "no shared secret configured; delivery is unverified");
        return Ok(());
    }
    if signature::verify(body, header.unwrap_or_default(), secret) {
        return Ok(());
    }
    counter!("webhook_unauthorized_total", "platform" => platform).increment(1);
    warn!(
        target: "webhook",
        platform,
        header_present = header.is_some(),
        "rejected delivery with invalid signature"
    );
    Err(WebhookError::Unauthorized("invalid signature"))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryReport {
    /// `ok` when nothing failed, `partial` otherwise.
    pub status: &'static str,
    pub entries: usize,
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// 200 with counts when at least one entry was published or the payload had
/// none; a non-empty batch with nothing published is an error.
pub fn delivery_response(
    platform: &'static str,
    tenant_id: &str,
    outcome: BatchOutcome,
) -> Result<Json<DeliveryReport>, WebhookError> {
    if outcome.entries > 0 && outcome.published == 0 {
        warn!(
            target: "webhook",
            platform,
            tenant_id,
            entries = outcome.entries,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "no entry of the delivery could be published"
        );
        return Err(WebhookError::PublishFailed {
            entries: outcome.entries,
        });
    }

    info!(
        target: "webhook",
        platform,
        tenant_id,
        entries = outcome.entries,
        published = outcome.published,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "delivery processed"
    );
    Ok(Json(DeliveryReport {
        status: if outcome.failed == 0 && outcome.skipped == 0 {
            "ok"
        } else {
            "partial"
        },
        entries: outcome.entries,
        published: outcome.published,
        failed: outcome.failed,
        skipped: outcome.skipped,
    }))
}
