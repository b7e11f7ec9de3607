// tests/config_env.rs
//
// Process-environment configuration and wiring. Serialized because the tests
// mutate env vars.

use std::env;
use std::time::Duration;

use content_ingest::config::{AppConfig, BusMode};
use content_ingest::{AppState, CanonicalIngestionEvent, EventPublisher, SourceType};

const KEYS: [&str; 9] = [
    "BUS_MODE",
    "BUS_TOPIC",
    "BUS_TIMEOUT_SECS",
    "DEFAULT_TENANT_ID",
    "YOUTUBE_WEBHOOK_SECRET",
    "REDDIT_WEBHOOK_KEY",
    "ADMISSION_WINDOW_SECS",
    "FEED_POLL_INTERVAL_SECS",
    "FEED_SOURCES_PATH",
];

fn clear_env() {
    for k in KEYS {
        env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn from_env_reads_process_environment() {
    clear_env();
    env::set_var("BUS_MODE", "memory");
    env::set_var("BUS_TOPIC", "ingest.events");
    env::set_var("BUS_TIMEOUT_SECS", "not-a-number");
    env::set_var("DEFAULT_TENANT_ID", " acme ");
    env::set_var("YOUTUBE_WEBHOOK_SECRET", "yt");
    env::set_var("ADMISSION_WINDOW_SECS", "30");
    env::set_var("FEED_POLL_INTERVAL_SECS", "120");
    env::set_var("FEED_SOURCES_PATH", "/etc/ingest/feeds.toml");

    let cfg = AppConfig::from_env().expect("config loads");
    assert_eq!(cfg.bus.mode, BusMode::Memory);
    assert_eq!(cfg.bus.producer.topic, "ingest.events");
    assert_eq!(cfg.bus.producer.send_timeout, Duration::from_secs(10));
    assert_eq!(cfg.default_tenant.as_deref(), Some("acme"));
    assert_eq!(cfg.secrets.youtube, "yt");
    assert!(cfg.secrets.reddit_key.is_empty());
    assert_eq!(cfg.admission.window, Duration::from_secs(30));
    assert_eq!(cfg.poll_interval, Duration::from_secs(120));
    assert_eq!(
        cfg.feed_sources_path.as_deref(),
        Some(std::path::Path::new("/etc/ingest/feeds.toml"))
    );
    clear_env();
}

#[serial_test::serial]
#[test]
fn unknown_bus_mode_is_an_error() {
    clear_env();
    env::set_var("BUS_MODE", "pigeon");
    assert!(AppConfig::from_env().is_err());
    clear_env();
}

#[serial_test::serial]
#[tokio::test]
async fn disabled_bus_accepts_events_silently() {
    clear_env();
    let cfg = AppConfig::from_env().expect("defaults load");
    assert_eq!(cfg.bus.mode, BusMode::Disabled);

    let state = AppState::from_config(&cfg);
    let ev = CanonicalIngestionEvent::new("t", SourceType::Rss, "feed", "https://a/1");
    state
        .gateway
        .publisher
        .publish(&ev)
        .await
        .expect("disabled publisher succeeds");
}
