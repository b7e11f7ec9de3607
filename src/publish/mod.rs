// src/publish/mod.rs
//! Event publishing: the `EventPublisher` seam plus its implementations.
//!
//! - [`BusPublisher`] drives a [`BusTransport`] with validation, idempotency
//!   keys, bounded retry and timeouts.
//! - [`DisabledPublisher`] is the null object used when no bus is configured.

pub mod bus;
pub mod memory;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::event::CanonicalIngestionEvent;

pub use bus::{BusPublisher, BusRecord, BusTransport, Compression, ProducerSettings};
pub use memory::MemoryBus;
pub use rest::RestProxyTransport;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event; returns once the bus has acknowledged it.
    async fn publish(&self, event: &CanonicalIngestionEvent) -> Result<(), PublishError>;

    /// Publishes events in order. Every event is attempted even when an
    /// earlier one fails; any failure is reported as [`PublishError::Batch`].
    async fn publish_batch(&self, events: &[CanonicalIngestionEvent]) -> Result<(), PublishError> {
        let outcome = publish_all(self, events, events.len()).await;
        if outcome.failed > 0 {
            return Err(PublishError::Batch {
                failed: outcome.failed,
                total: events.len(),
            });
        }
        Ok(())
    }
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Null-object publisher: validates and drops events, always succeeding.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl EventPublisher for DisabledPublisher {
    async fn publish(&self, event: &CanonicalIngestionEvent) -> Result<(), PublishError> {
        event.validate()?;
        debug!(
            target: "publish",
            key = %event.partition_key(),
            url = %event.content_url,
            "bus disabled; event dropped"
        );
        Ok(())
    }
}

/// Counts from a continue-on-error batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Items found in the inbound payload.
    pub entries: usize,
    /// Items that could not become a valid event and were never sent.
    pub skipped: usize,
    pub published: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.published + self.failed
    }
}

/// Publishes every event, logging and counting failures instead of stopping.
/// `entries` is the number of items in the original payload; items that
/// never became events are reported as skipped.
pub async fn publish_all<P>(
    publisher: &P,
    events: &[CanonicalIngestionEvent],
    entries: usize,
) -> BatchOutcome
where
    P: EventPublisher + ?Sized,
{
    publish_each(publisher, events, entries, None).await.0
}

/// Like [`publish_all`], but stops sending once `deadline` passes. Events not
/// acknowledged by then count as failed.
pub async fn publish_all_until<P>(
    publisher: &P,
    events: &[CanonicalIngestionEvent],
    entries: usize,
    deadline: Instant,
) -> BatchOutcome
where
    P: EventPublisher + ?Sized,
{
    publish_each(publisher, events, entries, Some(deadline)).await.0
}

/// Batch publish that also reports, per event and in input order, whether the
/// bus acknowledged it.
pub async fn publish_each<P>(
    publisher: &P,
    events: &[CanonicalIngestionEvent],
    entries: usize,
    deadline: Option<Instant>,
) -> (BatchOutcome, Vec<bool>)
where
    P: EventPublisher + ?Sized,
{
    let mut outcome = BatchOutcome {
        entries,
        skipped: entries.saturating_sub(events.len()),
        ..Default::default()
    };
    let mut acked = Vec::with_capacity(events.len());

    for (index, event) in events.iter().enumerate() {
        let sent = match deadline {
            Some(at) => match tokio::time::timeout_at(at, publisher.publish(event)).await {
                Ok(sent) => sent,
                Err(_) => {
                    let remaining = events.len() - index;
                    outcome.failed += remaining;
                    acked.resize(events.len(), false);
                    warn!(
                        target: "publish",
                        index,
                        remaining,
                        tenant_id = %event.tenant_id,
                        "request deadline reached; abandoning the rest of the batch"
                    );
                    break;
                }
            },
            None => publisher.publish(event).await,
        };
        match sent {
            Ok(()) => {
                outcome.published += 1;
                acked.push(true);
            }
            Err(e) => {
                outcome.failed += 1;
                acked.push(false);
                warn!(
                    target: "publish",
                    index,
                    tenant_id = %event.tenant_id,
                    source_type = %event.source_type,
                    url = %event.content_url,
                    error = %e,
                    "publish failed; continuing with batch"
                );
            }
        }
    }
    (outcome, acked)
}
