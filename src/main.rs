//! Content ingestion gateway: binary entrypoint.
//! Boots the Axum HTTP server, the admission sweeper and the feed pollers.

use std::sync::Arc;

use content_ingest::{
    api, config,
    metrics::Metrics,
    AppConfig, AppState,
};
use shuttle_axum::ShuttleAxum;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("content_ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have installed a subscriber.
    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if installed.is_err() {
        eprintln!("tracing subscriber already installed; keeping it");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env().map_err(shuttle_runtime::Error::Custom)?;

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = ?e, "prometheus recorder unavailable; /metrics disabled");
            None
        }
    };

    let state = AppState::from_config(&cfg);

    // --- Background work: admission sweep + feed pollers ---
    let sweeper = state.admission.start();
    let sources = match &cfg.feed_sources_path {
        Some(path) => config::load_feed_sources_from(path),
        None => config::load_feed_sources_default(),
    }
    .unwrap_or_else(|e| {
        warn!(error = ?e, "feed sources could not be loaded; polling disabled");
        Vec::new()
    });
    info!(sources = sources.len(), "starting feed pollers");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pollers = Arc::clone(&state.poller).spawn(sources, shutdown_rx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; stopping background tasks");
        }
        let _ = shutdown_tx.send(true);
        sweeper.stop().await;
        pollers.join().await;
    });

    let mut router = api::router(state);
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
