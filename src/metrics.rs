use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers help text for every pipeline metric (idempotent).
pub fn ensure_described() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("webhook_requests_total", "Webhook deliveries received, by platform.");
        describe_counter!(
            "webhook_unauthorized_total",
            "Webhook deliveries rejected for a bad signature or key, by platform."
        );
        describe_counter!("publish_attempts_total", "Bus send attempts, retries included.");
        describe_counter!("publish_success_total", "Events acknowledged by the bus.");
        describe_counter!("publish_failures_total", "Events that could not be published.");
        describe_counter!("admission_rejected_total", "Requests rejected by admission control.");
        describe_counter!("feed_poll_errors_total", "Feed poll cycles that failed.");
        describe_counter!("feed_items_total", "Feed entries produced by normalization.");
        describe_histogram!("feed_parse_ms", Unit::Milliseconds, "Feed normalization time.");
    });
}

impl Metrics {
    /// Installs the global Prometheus recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
