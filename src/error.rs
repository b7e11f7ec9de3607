// src/error.rs
//! Error types shared across the ingestion pipeline.
//!
//! Library code returns these typed errors; configuration loading and the
//! binary entry point use `anyhow` instead.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures while fetching or normalizing a syndication feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("document is neither RSS 2.0 nor Atom (rss: {rss}; atom: {atom})")]
    Unrecognized { rss: String, atom: String },

    #[error("fetching feed {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed {url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("fetching feed {url} timed out after {}s", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },
}

/// Failures while handing an event to the message bus.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid event: {0}")]
    InvalidEvent(&'static str),

    #[error("serializing event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("bus transport: {message}")]
    Transport { message: String, retryable: bool },

    #[error("bus send timed out")]
    Timeout,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("{failed} of {total} events failed to publish")]
    Batch { failed: usize, total: usize },
}

impl PublishError {
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            message: message.into(),
            retryable,
        }
    }

    /// Whether a retry of the same send may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Timeout => true,
            _ => false,
        }
    }
}

/// Request-level failures of the HTTP ingress paths.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("none of {entries} entries could be published")]
    PublishFailed { entries: usize },

    #[error("not configured: {0}")]
    Misconfigured(&'static str),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("upstream feed error: {0}")]
    Upstream(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PublishFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::PublishFailed { .. } => "publish_failed",
            Self::Misconfigured(_) => "misconfigured",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream(_) => "upstream_error",
        }
    }
}

/// Whole seconds, rounded up, never below one.
pub(crate) fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            Self::RateLimited { retry_after } => Some(retry_after_secs(*retry_after)),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            detail: self.to_string(),
            retry_after,
        };
        let mut resp = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        resp
    }
}
