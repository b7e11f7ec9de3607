// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod admission;
pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod metrics;
pub mod poller;
pub mod publish;
pub mod signature;
pub mod webhooks;

// ---- Re-exports for stable public API ----
pub use crate::admission::{Admission, AdmissionConfig, AdmissionControl, AdmissionSweeper};
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::{FeedError, PublishError, WebhookError};
pub use crate::event::{CanonicalIngestionEvent, SourceType};
pub use crate::feed::{parse_feed, Feed, FeedItem};
pub use crate::poller::{FeedPoller, FeedSource, PollerHandle};
pub use crate::publish::{
    BusPublisher, DisabledPublisher, EventPublisher, MemoryBus, SharedPublisher,
};
