// src/poller.rs
//! Periodic and on-demand polling of RSS/Atom sources.
//!
//! Every configured source runs in its own task on a fixed interval. A poll
//! fetches the document (time-boxed), normalizes it, drops entries older than
//! the source cursor and publishes the rest as `rss` events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::event::{CanonicalIngestionEvent, SourceType, PRIORITY_DEFAULT};
use crate::feed::{parse_feed, Feed, FeedItem};
use crate::publish::{publish_all, publish_each, BatchOutcome, SharedPublisher};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One feed to poll on behalf of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub tenant_id: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Entries published before this instant are never ingested.
    #[serde(default)]
    pub published_after: Option<DateTime<Utc>>,
}

/// Progress through one source: newest publish time seen, the ids that share
/// it, and the ids already handed to the bus while the time cursor was held
/// back (undated entries, or cycles with failures).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCursor {
    pub high_water: Option<DateTime<Utc>>,
    boundary_ids: HashSet<String>,
    delivered: HashSet<String>,
}

/// Identity of an entry within its feed.
fn item_key(item: &FeedItem) -> &str {
    if item.id.is_empty() {
        &item.link
    } else {
        &item.id
    }
}

impl PollCursor {
    fn cutoff(&self, floor: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (self.high_water, floor) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn is_new(&self, item: &FeedItem) -> bool {
        let key = item_key(item);
        if self.delivered.contains(key) {
            return false;
        }
        match (self.high_water, item.published_at) {
            (Some(hw), Some(p)) if p == hw => !self.boundary_ids.contains(key),
            _ => true,
        }
    }

    /// Moves the time cursor past `items`. Only called when every one of them
    /// was handled, so nothing older than the new mark is still pending.
    fn advance(&mut self, items: &[FeedItem]) {
        for item in items {
            let Some(p) = item.published_at else { continue };
            let key = item_key(item).to_string();
            match self.high_water {
                Some(hw) if p < hw => {}
                Some(hw) if p == hw => {
                    self.boundary_ids.insert(key);
                }
                _ => {
                    self.high_water = Some(p);
                    self.boundary_ids.clear();
                    self.boundary_ids.insert(key);
                }
            }
        }
    }

    fn mark_delivered<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        self.delivered.extend(keys.into_iter().map(str::to_string));
    }

    /// Forgets delivered ids that are no longer listed in the feed; entries
    /// that dropped off the document do not come back.
    fn retain_listed(&mut self, listed: &[FeedItem]) {
        let listed: HashSet<&str> = listed.iter().map(item_key).collect();
        self.delivered.retain(|k| listed.contains(k.as_str()));
    }

    /// Ids remembered outside the time cursor.
    pub fn delivered_len(&self) -> usize {
        self.delivered.len()
    }
}

pub struct FeedPoller {
    client: reqwest::Client,
    publisher: SharedPublisher,
    fetch_timeout: Duration,
    interval: Duration,
}

impl FeedPoller {
    pub fn new(publisher: SharedPublisher) -> Self {
        Self {
            client: reqwest::Client::new(),
            publisher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetches and normalizes `url`, keeping entries at or after
    /// `published_after` when given. Nothing is published.
    pub async fn fetch_feed(
        &self,
        url: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Result<Feed, FeedError> {
        let body = tokio::time::timeout(self.fetch_timeout, self.download(url))
            .await
            .map_err(|_| FeedError::Timeout {
                url: url.to_string(),
                timeout: self.fetch_timeout,
            })??;

        let feed = parse_feed(&body)?;
        Ok(match published_after {
            Some(cutoff) => feed.since(cutoff),
            None => feed,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let fetch_err = |source| FeedError::Fetch {
            url: url.to_string(),
            source,
        };
        let resp = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await
            .map_err(fetch_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().await.map_err(fetch_err)?.to_vec())
    }

    /// Fetches and publishes one feed for `tenant_id` right away.
    pub async fn poll_once(
        &self,
        tenant_id: &str,
        url: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Result<BatchOutcome, FeedError> {
        let feed = self.fetch_feed(url, published_after).await?;
        Ok(self.publish_feed(tenant_id, url, &feed, &feed.items).await)
    }

    /// One scheduled cycle for `source`. Acknowledged and unpublishable
    /// entries are remembered right away; the time cursor only moves forward
    /// when nothing failed, so failed entries are retried next cycle.
    pub async fn poll_source(
        &self,
        source: &FeedSource,
        cursor: &mut PollCursor,
    ) -> Result<BatchOutcome, FeedError> {
        let feed = self
            .fetch_feed(&source.url, cursor.cutoff(source.published_after))
            .await?;
        let fresh: Vec<&FeedItem> = feed.items.iter().filter(|it| cursor.is_new(it)).collect();

        let mut handled: Vec<&str> = Vec::with_capacity(fresh.len());
        let mut sent: Vec<&str> = Vec::with_capacity(fresh.len());
        let mut events = Vec::with_capacity(fresh.len());
        for &item in &fresh {
            match feed_item_event(&source.tenant_id, &source.url, &feed, item) {
                Some(ev) => {
                    sent.push(item_key(item));
                    events.push(ev);
                }
                None => handled.push(item_key(item)),
            }
        }

        let (outcome, acked) = publish_each(self.publisher.as_ref(), &events, fresh.len(), None).await;
        handled.extend(sent.into_iter().zip(acked).filter_map(|(key, ok)| ok.then_some(key)));

        cursor.mark_delivered(handled);
        if outcome.failed == 0 {
            let fresh: Vec<FeedItem> = fresh.into_iter().cloned().collect();
            cursor.advance(&fresh);
        }
        cursor.retain_listed(&feed.items);
        Ok(outcome)
    }

    async fn publish_feed(
        &self,
        tenant_id: &str,
        feed_url: &str,
        feed: &Feed,
        items: &[FeedItem],
    ) -> BatchOutcome {
        let events: Vec<_> = items
            .iter()
            .filter_map(|it| feed_item_event(tenant_id, feed_url, feed, it))
            .collect();
        publish_all(self.publisher.as_ref(), &events, items.len()).await
    }

    /// Starts one polling task per source. Tasks exit once `shutdown` turns
    /// true or its sender is dropped; an in-flight poll is allowed to finish.
    pub fn spawn(self: Arc<Self>, sources: Vec<FeedSource>, shutdown: watch::Receiver<bool>) -> PollerHandle {
        let tasks = sources
            .into_iter()
            .map(|source| {
                let poller = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { poller.run_source(source, shutdown).await })
            })
            .collect();
        PollerHandle { tasks }
    }

    async fn run_source(&self, source: FeedSource, mut shutdown: watch::Receiver<bool>) {
        let label = source.name.clone().unwrap_or_else(|| source.url.clone());
        info!(
            target: "poller",
            source = %label,
            tenant_id = %source.tenant_id,
            interval_secs = self.interval.as_secs(),
            "feed poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cursor = PollCursor::default();

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_source(&source, &mut cursor).await {
                        Ok(outcome) => debug!(
                            target: "poller",
                            source = %label,
                            entries = outcome.entries,
                            published = outcome.published,
                            failed = outcome.failed,
                            "poll cycle finished"
                        ),
                        Err(e) => {
                            counter!("feed_poll_errors_total").increment(1);
                            warn!(target: "poller", source = %label, error = %e, "poll cycle failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(target: "poller", source = %label, "feed poller stopped");
    }
}

/// Turns a normalized entry into an `rss` event; entries without any URL are
/// skipped.
pub fn feed_item_event(
    tenant_id: &str,
    feed_url: &str,
    feed: &Feed,
    item: &FeedItem,
) -> Option<CanonicalIngestionEvent> {
    let url = if !item.link.trim().is_empty() {
        item.link.trim()
    } else if item.id.starts_with("http://") || item.id.starts_with("https://") {
        item.id.as_str()
    } else {
        return None;
    };

    let mut ev = CanonicalIngestionEvent::new(tenant_id, SourceType::Rss, feed_url, url)
        .with_priority(PRIORITY_DEFAULT)
        .with_meta("title", item.title.as_str())
        .with_meta("guid", item.id.as_str())
        .with_meta("feed_title", feed.title.as_str());
    if let Some(author) = &item.author {
        ev = ev.with_meta("author", author.as_str());
    }
    if let Some(published) = item.published_at {
        ev = ev.with_meta("published_at", published.to_rfc3339());
    }
    if !item.categories.is_empty() {
        ev = ev.with_meta("categories", item.categories.clone());
    }
    if let Some(image) = &item.image_url {
        ev = ev.with_meta("image_url", image.as_str());
    }
    Some(ev)
}

pub struct PollerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every source task to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(target: "poller", error = %e, "poller task ended abnormally");
            }
        }
    }
}
