// src/publish/rest.rs
//! Transport for a Kafka REST Proxy (v3 records API).
//!
//! `POST {base}/v3/clusters/{cluster}/topics/{topic}/records` with a string
//! key, a JSON value and a `message-id` header. A record counts as delivered
//! only when the proxy answers with its partition and offset.

use std::io::Write as _;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use flate2::{write::GzEncoder, Compression as GzLevel};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bus::{BusRecord, BusTransport, Compression, ProducerSettings};
use crate::error::PublishError;

#[derive(Clone)]
pub struct RestProxyTransport {
    client: Client,
    base_url: String,
    cluster_id: String,
}

impl RestProxyTransport {
    pub fn new(base_url: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cluster_id: cluster_id.into(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn records_url(&self, topic: &str) -> String {
        format!(
            "{}/v3/clusters/{}/topics/{}/records",
            self.base_url, self.cluster_id, topic
        )
    }
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    key: TypedData<&'a str>,
    value: TypedData<&'a Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<RecordHeader>,
}

#[derive(Serialize)]
struct TypedData<T> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: T,
}

#[derive(Serialize)]
struct RecordHeader {
    name: &'static str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    partition_id: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, PublishError> {
    let mut enc = GzEncoder::new(Vec::with_capacity(body.len() / 2), GzLevel::default());
    let gz_err = |e: std::io::Error| PublishError::transport(format!("gzip: {e}"), false);
    enc.write_all(body).map_err(gz_err)?;
    enc.finish().map_err(gz_err)
}

/// 408, 429 and 5xx are worth retrying; other client errors are not.
fn status_is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl BusTransport for RestProxyTransport {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError> {
        let value: Value = serde_json::from_slice(&record.payload)?;
        let mut headers = Vec::new();
        if settings.idempotent {
            headers.push(RecordHeader {
                name: "message-id",
                value: B64.encode(record.message_id.as_bytes()),
            });
        }
        let body = serde_json::to_vec(&ProduceRequest {
            key: TypedData {
                kind: "STRING",
                data: &record.key,
            },
            value: TypedData {
                kind: "JSON",
                data: &value,
            },
            headers,
        })?;

        let mut req = self
            .client
            .post(self.records_url(&record.topic))
            .timeout(settings.send_timeout)
            .header(header::CONTENT_TYPE, "application/json");
        req = match settings.compression {
            Compression::Gzip => req
                .header(header::CONTENT_ENCODING, "gzip")
                .body(gzip(&body)?),
            Compression::None => req.body(body),
        };

        let resp = req.send().await.map_err(|e| {
            PublishError::transport(format!("request to bus proxy failed: {e}"), true)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PublishError::transport(
                format!("bus proxy answered HTTP {status}: {}", text.trim()),
                status_is_retryable(status),
            ));
        }

        let ack: ProduceResponse = resp.json().await.map_err(|e| {
            PublishError::transport(format!("unreadable bus proxy ack: {e}"), true)
        })?;
        if let Some(code) = ack.error_code.filter(|c| *c != 200) {
            let reason = ack.message.unwrap_or_default();
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(PublishError::transport(
                format!("bus rejected record ({code}): {reason}"),
                status_is_retryable(status),
            ));
        }
        if settings.require_all_acks && (ack.partition_id.is_none() || ack.offset.is_none()) {
            return Err(PublishError::transport(
                "bus proxy ack lacks partition/offset",
                true,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read as _;

    #[test]
    fn records_url_trims_trailing_slash() {
        let t = RestProxyTransport::new("http://proxy:8082/", "c1");
        assert_eq!(
            t.records_url("content.ingest"),
            "http://proxy:8082/v3/clusters/c1/topics/content.ingest/records"
        );
    }

    #[test]
    fn gzip_output_decompresses() {
        let raw = br#"{"key":"value"}"#.repeat(20);
        let packed = gzip(&raw).unwrap();
        let mut out = Vec::new();
        GzDecoder::new(packed.as_slice()).read_to_end(&mut out).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn retryable_statuses() {
        assert!(status_is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(status_is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!status_is_retryable(StatusCode::BAD_REQUEST));
        assert!(!status_is_retryable(StatusCode::NOT_FOUND));
    }
}
