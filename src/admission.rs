// src/admission.rs
//! Per-tenant, per-client fixed-window admission control.
//!
//! Advisory only: counters live in memory and reset on restart. Stale keys are
//! evicted by a background sweep started with [`AdmissionControl::start`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::WebhookError;
use crate::webhooks::resolve_tenant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

type Key = (String, String);

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    config: AdmissionConfig,
    counters: Arc<Mutex<HashMap<Key, Counter>>>,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> AdmissionConfig {
        self.config
    }

    /// Counts one request for `(tenant_id, client_ip)` and decides on it.
    pub fn check(&self, tenant_id: &str, client_ip: &str) -> Admission {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters
            .entry((tenant_id.to_string(), client_ip.to_string()))
            .or_insert(Counter {
                count: 0,
                window_start: now,
                last_seen: now,
            });
        counter.last_seen = now;

        let elapsed = now.duration_since(counter.window_start);
        if elapsed > self.config.window {
            counter.count = 1;
            counter.window_start = now;
            return Admission::Allowed {
                remaining: self.config.max_requests.saturating_sub(1),
            };
        }

        counter.count = counter.count.saturating_add(1);
        if counter.count > self.config.max_requests {
            Admission::Rejected {
                retry_after: self.config.window.saturating_sub(elapsed),
            }
        } else {
            Admission::Allowed {
                remaining: self.config.max_requests - counter.count,
            }
        }
    }

    /// Drops keys idle for longer than one window. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|_, c| now.duration_since(c.last_seen) <= window);
        before - counters.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawns the periodic eviction sweep (once per window).
    pub fn start(&self) -> AdmissionSweeper {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let control = self.clone();
        let period = self.config.window.max(Duration::from_secs(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = control.sweep();
                        if evicted > 0 {
                            debug!(target: "admission", evicted, "evicted idle admission keys");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(target: "admission", "admission sweeper stopped");
        });
        AdmissionSweeper {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to the running sweep task.
pub struct AdmissionSweeper {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AdmissionSweeper {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer when the server was built with connect info.
///
/// Behind the hosting proxy the peer is always the proxy itself, so the
/// forwarding headers are what tell clients apart. Requests carrying neither
/// a header nor a peer share the `unknown` bucket of their tenant.
pub fn client_ip(req: &Request) -> String {
    let headers = req.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Tenant the handlers will see: same header, decoded query and default.
/// Requests without any tenant are counted under an empty tenant and then
/// rejected by the handler.
fn tenant_of(req: &Request, default_tenant: Option<&str>) -> String {
    let query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    resolve_tenant(req.headers(), &query, default_tenant).unwrap_or_default()
}

/// State for [`admission_gate`].
#[derive(Clone)]
pub struct GateState {
    pub control: AdmissionControl,
    pub default_tenant: Option<String>,
}

/// Axum middleware: one admission check per inbound request.
pub async fn admission_gate(
    State(gate): State<GateState>,
    req: Request,
    next: Next,
) -> Response {
    let tenant = tenant_of(&req, gate.default_tenant.as_deref());
    let ip = client_ip(&req);
    match gate.control.check(&tenant, &ip) {
        Admission::Allowed { .. } => next.run(req).await,
        Admission::Rejected { retry_after } => {
            counter!("admission_rejected_total").increment(1);
            warn!(
                target: "admission",
                tenant_id = %tenant,
                client_ip = %ip,
                retry_after_ms = retry_after.as_millis() as u64,
                "request rejected by admission control"
            );
            WebhookError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(max: u32, secs: u64) -> AdmissionControl {
        AdmissionControl::new(AdmissionConfig {
            max_requests: max,
            window: Duration::from_secs(secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_request_in_window_is_rejected_then_window_resets() {
        let ac = control(3, 60);
        for _ in 0..3 {
            assert!(ac.check("t1", "10.0.0.1").is_allowed());
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        match ac.check("t1", "10.0.0.1") {
            Admission::Rejected { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(51)).await;
        assert_eq!(
            ac.check("t1", "10.0.0.1"),
            Admission::Allowed { remaining: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent_per_tenant_and_ip() {
        let ac = control(1, 60);
        assert!(ac.check("t1", "ip").is_allowed());
        assert!(!ac.check("t1", "ip").is_allowed());
        assert!(ac.check("t2", "ip").is_allowed());
        assert!(ac.check("t1", "other-ip").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_keys_only() {
        let ac = control(5, 60);
        ac.check("old", "ip");
        tokio::time::advance(Duration::from_secs(45)).await;
        ac.check("fresh", "ip");
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(ac.sweep(), 1);
        assert_eq!(ac.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_and_stops() {
        let ac = control(5, 1);
        ac.check("t", "ip");
        let sweeper = ac.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ac.tracked_keys(), 0);
        sweeper.stop().await;
    }

    fn request(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn tenant_matches_handler_resolution() {
        assert_eq!(tenant_of(&request("/x?tenant_id=acme%20corp"), None), "acme corp");
        assert_eq!(tenant_of(&request("/x"), Some("dflt")), "dflt");
        assert_eq!(tenant_of(&request("/x"), None), "");

        let mut req = request("/x?tenant_id=q");
        req.headers_mut()
            .insert("x-tenant-id", axum::http::HeaderValue::from_static("h"));
        assert_eq!(tenant_of(&req, Some("dflt")), "h");
    }

    #[test]
    fn client_ip_falls_back_to_peer_then_unknown() {
        let mut req = request("/x");
        assert_eq!(client_ip(&req), "unknown");

        let peer: SocketAddr = "203.0.113.7:50000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(client_ip(&req), "203.0.113.7");

        req.headers_mut().insert(
            "x-forwarded-for",
            axum::http::HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&req), "198.51.100.1");
    }
}
