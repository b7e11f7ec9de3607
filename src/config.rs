// src/config.rs
//! Runtime configuration: environment variables plus the feed source list.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use crate::admission::AdmissionConfig;
use crate::poller::FeedSource;
use crate::publish::bus::{ProducerSettings, DEFAULT_TOPIC};
use crate::webhooks::{WebhookSecrets, DEFAULT_DELIVERY_DEADLINE};

const ENV_FEED_SOURCES_PATH: &str = "FEED_SOURCES_PATH";
const DEFAULT_FEED_SOURCES_TOML: &str = "config/feeds.toml";
const DEFAULT_FEED_SOURCES_JSON: &str = "config/feeds.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusMode {
    #[default]
    Disabled,
    Memory,
    Rest,
}

impl FromStr for BusMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disabled" | "off" | "none" => Ok(Self::Disabled),
            "memory" | "inmemory" => Ok(Self::Memory),
            "rest" | "rest-proxy" | "kafka-rest" => Ok(Self::Rest),
            other => Err(anyhow!("unknown BUS_MODE '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub mode: BusMode,
    pub rest_url: String,
    pub cluster_id: String,
    pub producer: ProducerSettings,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub secrets: WebhookSecrets,
    pub default_tenant: Option<String>,
    pub bus: BusConfig,
    pub admission: AdmissionConfig,
    /// Time a webhook delivery may spend publishing before it answers.
    pub delivery_deadline: Duration,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub feed_sources_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();

        let mode: BusMode = text("BUS_MODE").parse()?;
        let rest_url = text("BUS_REST_URL");
        let cluster_id = text("BUS_CLUSTER_ID");
        if mode == BusMode::Rest && (rest_url.is_empty() || cluster_id.is_empty()) {
            bail!("BUS_MODE=rest requires BUS_REST_URL and BUS_CLUSTER_ID");
        }

        let topic = Some(text("BUS_TOPIC"))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let producer = ProducerSettings {
            topic,
            max_retries: number(&lookup, "BUS_MAX_RETRIES", 3),
            send_timeout: Duration::from_secs(number(&lookup, "BUS_TIMEOUT_SECS", 10)),
            ..ProducerSettings::default()
        };

        let admission = AdmissionConfig {
            max_requests: number(&lookup, "ADMISSION_MAX_REQUESTS", 100),
            window: Duration::from_secs(number(&lookup, "ADMISSION_WINDOW_SECS", 60)),
        };

        Ok(Self {
            secrets: WebhookSecrets {
                youtube: text("YOUTUBE_WEBHOOK_SECRET"),
                twitter: text("TWITTER_CONSUMER_SECRET"),
                reddit_key: text("REDDIT_WEBHOOK_KEY"),
            },
            default_tenant: Some(text("DEFAULT_TENANT_ID")).filter(|t| !t.is_empty()),
            bus: BusConfig {
                mode,
                rest_url,
                cluster_id,
                producer,
            },
            admission,
            delivery_deadline: Duration::from_secs(number(
                &lookup,
                "WEBHOOK_DEADLINE_SECS",
                DEFAULT_DELIVERY_DEADLINE.as_secs(),
            )),
            poll_interval: Duration::from_secs(number(&lookup, "FEED_POLL_INTERVAL_SECS", 900)),
            fetch_timeout: Duration::from_secs(number(&lookup, "FEED_FETCH_TIMEOUT_SECS", 30)),
            feed_sources_path: Some(text(ENV_FEED_SOURCES_PATH))
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Positive number from `key`, or `default` (with a warning) when the value
/// is missing, malformed or zero.
fn number<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if v != T::default() => v,
        _ => {
            warn!(key, value = %raw, fallback = %default, "invalid numeric setting; using default");
            default
        }
    }
}

/// Load feed sources from an explicit path. Supports TOML or JSON formats.
pub fn load_feed_sources_from(path: &Path) -> Result<Vec<FeedSource>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feed_sources(&content, ext.as_str())
}

/// Load feed sources using env var + fallbacks:
/// 1) $FEED_SOURCES_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
pub fn load_feed_sources_default() -> Result<Vec<FeedSource>> {
    if let Ok(p) = std::env::var(ENV_FEED_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            bail!("{ENV_FEED_SOURCES_PATH} points to non-existent path {}", pb.display());
        }
        return load_feed_sources_from(&pb);
    }
    for candidate in [DEFAULT_FEED_SOURCES_TOML, DEFAULT_FEED_SOURCES_JSON] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_feed_sources_from(&p);
        }
    }
    Ok(Vec::new())
}

fn parse_feed_sources(s: &str, hint_ext: &str) -> Result<Vec<FeedSource>> {
    let try_toml = hint_ext == "toml" || s.contains("[[feeds]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported feed source format"))
}

fn parse_toml(s: &str) -> Result<Vec<FeedSource>> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        #[serde(default)]
        feeds: Vec<FeedSource>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    Ok(clean_sources(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<FeedSource>> {
    let v: Vec<FeedSource> = serde_json::from_str(s)?;
    Ok(clean_sources(v))
}

/// Trims fields, drops entries without tenant or url and merges duplicates
/// (same tenant + url; the first entry wins).
fn clean_sources(items: Vec<FeedSource>) -> Vec<FeedSource> {
    let mut merged: BTreeMap<(String, String), FeedSource> = BTreeMap::new();
    for mut it in items {
        it.tenant_id = it.tenant_id.trim().to_string();
        it.url = it.url.trim().to_string();
        it.name = it
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if it.tenant_id.is_empty() || it.url.is_empty() {
            continue;
        }
        merged
            .entry((it.tenant_id.clone(), it.url.clone()))
            .or_insert(it);
    }
    merged.into_values().collect()
}
