// src/publish/bus.rs
//! Bus-backed publisher: serializes events into keyed records and sends them
//! through a transport with bounded, idempotent retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::EventPublisher;
use crate::error::PublishError;
use crate::event::CanonicalIngestionEvent;

pub const DEFAULT_TOPIC: &str = "content.ingest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

/// Producer contract. Defaults favour durability over latency.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub topic: String,
    /// Only report success once every in-sync replica has the record.
    pub require_all_acks: bool,
    /// Attach a stable message id so transports can drop retried duplicates.
    pub idempotent: bool,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub send_timeout: Duration,
    pub compression: Compression,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            require_all_acks: true,
            idempotent: true,
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            send_timeout: Duration::from_secs(10),
            compression: Compression::Gzip,
        }
    }
}

/// One keyed record on its way to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: String,
    pub key: String,
    /// Derived from the item's identity, so retries and later re-sends of the
    /// same upstream item carry the same id.
    pub message_id: String,
    /// JSON-encoded [`CanonicalIngestionEvent`].
    pub payload: Vec<u8>,
}

impl BusRecord {
    pub fn from_event(topic: &str, event: &CanonicalIngestionEvent) -> Result<Self, PublishError> {
        let key = event.partition_key();
        Ok(Self {
            topic: topic.to_string(),
            message_id: message_id(&key, event),
            key,
            payload: serde_json::to_vec(event)?,
        })
    }

    pub fn event(&self) -> Result<CanonicalIngestionEvent, PublishError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Metadata fields naming the upstream item, most specific first.
const IDENTITY_FIELDS: [&str; 4] = ["guid", "video_id", "tweet_id", "post_id"];

fn meta_str<'a>(event: &'a CanonicalIngestionEvent, field: &str) -> &'a str {
    event
        .metadata
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
}

/// Partition key, content URL, upstream id and revision. `requested_at` is
/// left out: it changes on every delivery of the same item.
fn message_id(key: &str, event: &CanonicalIngestionEvent) -> String {
    let identity = IDENTITY_FIELDS
        .iter()
        .map(|field| meta_str(event, field))
        .find(|v| !v.is_empty())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    for part in [event.content_url.trim(), identity, meta_str(event, "updated")] {
        hasher.update(b"\n");
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Wire-level delivery of one record. Implementations must be safe to share
/// between concurrent callers.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: BusTransport + ?Sized> BusTransport for std::sync::Arc<T> {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError> {
        (**self).send(record, settings).await
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

pub struct BusPublisher<T> {
    transport: T,
    settings: ProducerSettings,
    /// One lock per partition key with a send in flight. A send holds its key
    /// through every retry, so later events on that key wait their turn.
    in_flight: Mutex<HashMap<String, KeyLock>>,
}

impl<T: BusTransport> BusPublisher<T> {
    pub fn new(transport: T, settings: ProducerSettings) -> Self {
        Self {
            transport,
            settings,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.settings.retry_backoff * (1u32 << attempt.saturating_sub(1).min(6))
    }

    fn key_lock(&self, key: &str) -> KeyLock {
        let mut locks = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drops the key's lock once no other send holds or awaits it.
    fn release(&self, key: &str, lock: KeyLock) {
        let mut locks = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Keys with a send currently holding or awaiting the ordering lock.
    pub fn keys_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn send_with_retry(&self, record: &BusRecord) -> Result<(), PublishError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("publish_attempts_total").increment(1);

            let sent = tokio::time::timeout(
                self.settings.send_timeout,
                self.transport.send(record, &self.settings),
            )
            .await
            .unwrap_or(Err(PublishError::Timeout));

            let err = match sent {
                Ok(()) => {
                    counter!("publish_success_total").increment(1);
                    debug!(
                        target: "publish",
                        key = %record.key,
                        message_id = %record.message_id,
                        attempt,
                        "event published"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                counter!("publish_failures_total").increment(1);
                return Err(err);
            }
            if attempt > self.settings.max_retries {
                counter!("publish_failures_total").increment(1);
                return Err(PublishError::RetriesExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            warn!(
                target: "publish",
                key = %record.key,
                attempt,
                error = %err,
                "transient bus failure; retrying"
            );
            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }
}

#[async_trait]
impl<T: BusTransport> EventPublisher for BusPublisher<T> {
    async fn publish(&self, event: &CanonicalIngestionEvent) -> Result<(), PublishError> {
        event.validate()?;
        let record = BusRecord::from_event(&self.settings.topic, event)?;

        let lock = self.key_lock(&record.key);
        let result = {
            let _turn = lock.lock().await;
            self.send_with_retry(&record).await
        };
        self.release(&record.key, lock);
        result
    }
}
