// src/event.rs
//! Canonical ingestion event: the single message shape published to the bus
//! for every source.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PublishError;

/// Priority assigned to push-webhook deliveries (time-sensitive).
pub const PRIORITY_PUSH: u8 = 1;
/// Priority assigned to API-triggered and polled ingestion.
pub const PRIORITY_DEFAULT: u8 = 5;
pub const PRIORITY_MAX: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Youtube,
    Twitter,
    Reddit,
    Rss,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::Rss => "rss",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "twitter" => Ok(Self::Twitter),
            "reddit" => Ok(Self::Reddit),
            "rss" => Ok(Self::Rss),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIngestionEvent {
    pub tenant_id: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub source_id: String,
    #[serde(rename = "url")]
    pub content_url: String,
    pub priority: u8,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub requested_at: DateTime<Utc>,
}

impl CanonicalIngestionEvent {
    /// New event stamped with the current time and the default priority.
    pub fn new(
        tenant_id: impl Into<String>,
        source_type: SourceType,
        source_id: impl Into<String>,
        content_url: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_type,
            source_id: source_id.into(),
            content_url: content_url.into(),
            priority: PRIORITY_DEFAULT,
            metadata: Map::new(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = at;
        self
    }

    /// Adds a metadata entry; empty strings are skipped.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !matches!(&value, Value::String(s) if s.is_empty()) && !value.is_null() {
            self.metadata.insert(key.to_string(), value);
        }
        self
    }

    /// Rejects events that must never reach the bus.
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.tenant_id.trim().is_empty() {
            return Err(PublishError::InvalidEvent("tenant_id is empty"));
        }
        if self.content_url.trim().is_empty() {
            return Err(PublishError::InvalidEvent("content_url is empty"));
        }
        if !(PRIORITY_PUSH..=PRIORITY_MAX).contains(&self.priority) {
            return Err(PublishError::InvalidEvent("priority outside 1..=10"));
        }
        Ok(())
    }

    /// Partition/ordering key: `tenant/source_type/source_id`, falling back to
    /// the content URL when the source id is unknown.
    pub fn partition_key(&self) -> String {
        let origin = if self.source_id.trim().is_empty() {
            self.content_url.as_str()
        } else {
            self.source_id.as_str()
        };
        format!("{}/{}/{}", self.tenant_id, self.source_type, origin)
    }
}
