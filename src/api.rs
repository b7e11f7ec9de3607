// src/api.rs
//! HTTP surface: webhooks, API-triggered ingestion, on-demand feed polls and
//! health. Everything except `/health` sits behind admission control.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::admission::{admission_gate, AdmissionControl, GateState};
use crate::config::{AppConfig, BusConfig, BusMode};
use crate::error::{FeedError, WebhookError};
use crate::event::{CanonicalIngestionEvent, SourceType, PRIORITY_DEFAULT, PRIORITY_MAX, PRIORITY_PUSH};
use crate::poller::FeedPoller;
use crate::publish::{
    BusPublisher, DisabledPublisher, EventPublisher, MemoryBus, RestProxyTransport, SharedPublisher,
};
use crate::webhooks::{self, delivery_response, DeliveryReport, GatewayState};

/// Upper bound for any inbound body.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayState,
    pub poller: Arc<FeedPoller>,
    pub admission: AdmissionControl,
}

impl AppState {
    pub fn new(gateway: GatewayState, poller: Arc<FeedPoller>, admission: AdmissionControl) -> Self {
        Self {
            gateway,
            poller,
            admission,
        }
    }

    /// Wires publisher, gateway, poller and admission from configuration.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let publisher = publisher_for(&cfg.bus);
        let mut gateway = GatewayState::new(publisher.clone(), cfg.secrets.clone())
            .with_deadline(cfg.delivery_deadline);
        if let Some(tenant) = &cfg.default_tenant {
            gateway = gateway.with_default_tenant(tenant.clone());
        }
        let poller = FeedPoller::new(publisher)
            .with_interval(cfg.poll_interval)
            .with_fetch_timeout(cfg.fetch_timeout);
        Self::new(gateway, Arc::new(poller), AdmissionControl::new(cfg.admission))
    }
}

/// Chooses the publisher once, at construction.
pub fn publisher_for(bus: &BusConfig) -> SharedPublisher {
    match bus.mode {
        BusMode::Disabled => {
            warn!(target: "publish", "no message bus configured; events will be dropped");
            Arc::new(DisabledPublisher)
        }
        BusMode::Memory => {
            info!(target: "publish", topic = %bus.producer.topic, "publishing to in-memory bus");
            Arc::new(BusPublisher::new(MemoryBus::new(), bus.producer.clone()))
        }
        BusMode::Rest => {
            info!(
                target: "publish",
                topic = %bus.producer.topic,
                proxy = %bus.rest_url,
                "publishing through bus REST proxy"
            );
            let transport = RestProxyTransport::new(bus.rest_url.clone(), bus.cluster_id.clone());
            Arc::new(BusPublisher::new(transport, bus.producer.clone()))
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/ingest", post(ingest))
        .route("/api/v1/feeds/poll", post(poll_feed))
        .with_state(state.clone());

    let gated = webhooks::router(state.gateway.clone())
        .merge(api)
        .layer(middleware::from_fn_with_state(
            GateState {
                control: state.admission.clone(),
                default_tenant: state.gateway.default_tenant.clone(),
            },
            admission_gate,
        ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(gated)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source_type: SourceType,
    #[serde(default)]
    source_id: String,
    #[serde(alias = "url")]
    content_url: String,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct IngestAccepted {
    status: &'static str,
    key: String,
}

async fn ingest(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestAccepted>), WebhookError> {
    let tenant = state.gateway.tenant(&headers, &query)?;
    let req: IngestRequest = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid ingest request: {e}")))?;

    let priority = req.priority.unwrap_or(PRIORITY_DEFAULT);
    if !(PRIORITY_PUSH..=PRIORITY_MAX).contains(&priority) {
        return Err(WebhookError::BadRequest(format!(
            "priority must be within {PRIORITY_PUSH}..={PRIORITY_MAX}, got {priority}"
        )));
    }
    if req.content_url.trim().is_empty() {
        return Err(WebhookError::BadRequest("content_url is required".to_string()));
    }

    let mut event = CanonicalIngestionEvent::new(
        tenant,
        req.source_type,
        req.source_id.trim(),
        req.content_url.trim(),
    )
    .with_priority(priority);
    event.metadata = req.metadata;

    let key = event.partition_key();
    state.gateway.publisher.publish(&event).await.map_err(|e| {
        warn!(target: "publish", key = %key, error = %e, "API ingestion failed");
        WebhookError::PublishFailed { entries: 1 }
    })?;

    info!(target: "webhook", key = %key, source_type = %event.source_type, "API ingestion queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            status: "queued",
            key,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct PollRequest {
    url: String,
    #[serde(default)]
    published_after: Option<DateTime<Utc>>,
}

async fn poll_feed(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryReport>, WebhookError> {
    let tenant = state.gateway.tenant(&headers, &query)?;
    let req: PollRequest = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid poll request: {e}")))?;
    let url = req.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(WebhookError::BadRequest("url must be http(s)".to_string()));
    }

    let outcome = state
        .poller
        .poll_once(&tenant, url, req.published_after)
        .await
        .map_err(|e| {
            warn!(target: "poller", url, error = %e, "on-demand poll failed");
            match e {
                FeedError::Unrecognized { .. } => {
                    WebhookError::Upstream(format!("{url} is not an RSS or Atom feed"))
                }
                other => WebhookError::Upstream(other.to_string()),
            }
        })?;

    delivery_response("rss", &tenant, outcome)
}
