// tests/webhooks_http.rs
//
// HTTP-level tests for the ingress Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot and inspect
// what reached the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    Router,
};
use http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt as _; // for `oneshot`

use content_ingest::publish::{BusRecord, BusTransport, ProducerSettings};
use content_ingest::webhooks::{GatewayState, WebhookSecrets};
use content_ingest::{
    api, signature, AdmissionConfig, AdmissionControl, AppState, BusPublisher,
    CanonicalIngestionEvent, FeedPoller, MemoryBus, PublishError, SourceType,
};

const BODY_LIMIT: usize = 1024 * 1024;
const YT_SECRET: &str = "yt-secret";
const TW_SECRET: &str = "tw-consumer-secret";
const REDDIT_KEY: &str = "reddit-key";

/// Memory bus that refuses (non-retryably) any event matching `reject`.
struct Bus {
    log: MemoryBus,
    reject: fn(&CanonicalIngestionEvent) -> bool,
}

#[async_trait]
impl BusTransport for Bus {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError> {
        let event = record.event()?;
        if (self.reject)(&event) {
            return Err(PublishError::transport("broker refused record", false));
        }
        self.log.send(record, settings).await
    }
}

fn accept_all(_: &CanonicalIngestionEvent) -> bool {
    false
}

fn secrets() -> WebhookSecrets {
    WebhookSecrets {
        youtube: YT_SECRET.into(),
        twitter: TW_SECRET.into(),
        reddit_key: REDDIT_KEY.into(),
    }
}

fn app_with(
    secrets: WebhookSecrets,
    reject: fn(&CanonicalIngestionEvent) -> bool,
    admission: AdmissionConfig,
) -> (Router, Arc<Bus>) {
    let bus = Arc::new(Bus {
        log: MemoryBus::new(),
        reject,
    });
    let publisher = Arc::new(BusPublisher::new(
        Arc::clone(&bus),
        ProducerSettings {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        },
    ));
    let gateway = GatewayState::new(publisher.clone(), secrets);
    let poller = Arc::new(FeedPoller::new(publisher));
    let state = AppState::new(gateway, poller, AdmissionControl::new(admission));
    (api::router(state), bus)
}

fn test_app() -> (Router, Arc<Bus>) {
    app_with(secrets(), accept_all, AdmissionConfig::default())
}

fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {path}: {e}"))
}

async fn read_json(resp: axum::response::Response) -> Value {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn read_text(resp: axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn youtube_post(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri("/webhooks/youtube")
        .header("x-tenant-id", "tenant-a")
        .header(header::CONTENT_TYPE, "application/atom+xml");
    if let Some(sig) = signature {
        req = req.header("x-hub-signature", sig);
    }
    req.body(Body::from(body)).expect("build youtube request")
}

fn reddit_posts(n: usize) -> Value {
    Value::Array(
        (1..=n)
            .map(|i| {
                json!({
                    "id": format!("p{i}"),
                    "subreddit": "rust",
                    "permalink": format!("/r/rust/comments/{i}"),
                    "title": format!("Post {i}"),
                    "author": "ferris"
                })
            })
            .collect(),
    )
}

fn reddit_post(body: &Value, key: Option<&str>) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri("/webhooks/reddit?tenant_id=tenant-r")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(k) = key {
        req = req.header("x-reddit-webhook-key", k);
    }
    req.body(Body::from(body.to_string())).expect("build reddit request")
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(read_text(resp).await, "OK");
}

#[tokio::test]
async fn youtube_handshake_echoes_challenge() {
    let (app, _) = test_app();
    for mode in ["subscribe", "unsubscribe"] {
        let req = Request::builder()
            .uri(format!(
                "/webhooks/youtube?hub.mode={mode}&hub.challenge=ch4ll3nge-42&hub.topic=x"
            ))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_text(resp).await, "ch4ll3nge-42");
    }

    let req = Request::builder()
        .uri("/webhooks/youtube?hub.mode=denied&hub.challenge=x")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_youtube_push_publishes_one_event() {
    let (app, bus) = test_app();
    let body = fixture("youtube_push.xml");
    let sig = format!("sha256={}", signature::sign(&body, YT_SECRET));

    let resp = app.oneshot(youtube_post(body, Some(sig))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = read_json(resp).await;
    assert_eq!(report["entries"], 1);
    assert_eq!(report["published"], 1);
    assert_eq!(report["status"], "ok");

    let events = bus.log.events();
    assert_eq!(events.len(), 1, "exactly one bus message");
    let ev = &events[0];
    assert_eq!(ev.tenant_id, "tenant-a");
    assert_eq!(ev.source_type, SourceType::Youtube);
    assert_eq!(ev.source_id, "UC1");
    assert_eq!(ev.priority, 1);
    assert_eq!(ev.content_url, "https://www.youtube.com/watch?v=abc");
    assert_eq!(ev.metadata["video_id"], "abc");
    assert_eq!(ev.metadata["title"], "Launch day");

    let records = bus.log.records();
    assert_eq!(records[0].key, "tenant-a/youtube/UC1");
}

#[tokio::test]
async fn youtube_push_with_bad_or_missing_signature_is_rejected() {
    let (app, bus) = test_app();
    let body = fixture("youtube_push.xml");
    let wrong = format!("sha256={}", signature::sign(&body, "not-the-secret"));

    let resp = app
        .clone()
        .oneshot(youtube_post(body.clone(), Some(wrong)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.oneshot(youtube_post(body, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let err = read_json(resp).await;
    assert_eq!(err["error"], "unauthorized");

    assert!(bus.log.is_empty(), "nothing may be published on auth failure");
}

#[tokio::test]
async fn youtube_without_secret_is_accepted_unverified() {
    let (app, bus) = app_with(
        WebhookSecrets::default(),
        accept_all,
        AdmissionConfig::default(),
    );
    let resp = app
        .oneshot(youtube_post(fixture("youtube_push.xml"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(bus.log.len(), 1);
}

#[tokio::test]
async fn malformed_youtube_body_is_bad_request() {
    let (app, bus) = test_app();
    let body = b"<feed><entry>".to_vec();
    let sig = signature::sign(&body, YT_SECRET);
    let resp = app.oneshot(youtube_post(body, Some(sig))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(bus.log.is_empty());
}

#[tokio::test]
async fn youtube_body_that_is_not_a_feed_is_bad_request() {
    let (app, bus) = test_app();
    for body in [
        b"<html><body>not a feed</body></html>".to_vec(),
        b"<feed><entry><id>x</id></entry></feed>".to_vec(),
    ] {
        let sig = format!("sha256={}", signature::sign(&body, YT_SECRET));
        let resp = app.clone().oneshot(youtube_post(body, Some(sig))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(resp).await["error"], "bad_request");
    }
    assert!(bus.log.is_empty());
}

#[tokio::test]
async fn delivery_without_tenant_is_bad_request() {
    let (app, _) = test_app();
    let body = fixture("youtube_push.xml");
    let sig = signature::sign(&body, YT_SECRET);
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/youtube")
        .header("x-hub-signature", sig)
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn twitter_crc_returns_hmac_token() {
    let (app, _) = test_app();
    let req = Request::builder()
        .uri("/webhooks/twitter?crc_token=challenge123")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await;
    assert_eq!(
        v["response_token"],
        format!("sha256={}", signature::sign(b"challenge123", TW_SECRET))
    );
}

#[tokio::test]
async fn twitter_crc_without_secret_is_server_error() {
    let (app, _) = app_with(
        WebhookSecrets::default(),
        accept_all,
        AdmissionConfig::default(),
    );
    let req = Request::builder()
        .uri("/webhooks/twitter?crc_token=abc")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn signed_twitter_activity_publishes_tweets() {
    let (app, bus) = test_app();
    let body = json!({
        "for_user_id": "2244994945",
        "tweet_create_events": [
            {"id_str": "1050118621198921728", "text": "Hello", "created_at": "Wed Oct 10 20:19:24 +0000 2018",
             "user": {"screen_name": "TwitterDev"}},
            {"text": "no id, skipped"}
        ]
    })
    .to_string();
    let sig = format!("sha256={}", signature::sign(body.as_bytes(), TW_SECRET));

    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/twitter")
        .header("x-tenant-id", "tenant-t")
        .header("x-twitter-webhooks-signature", sig)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = read_json(resp).await;
    assert_eq!(report["entries"], 2);
    assert_eq!(report["published"], 1);
    assert_eq!(report["skipped"], 1);

    let events = bus.log.events();
    assert_eq!(
        events[0].content_url,
        "https://twitter.com/TwitterDev/status/1050118621198921728"
    );
    assert_eq!(events[0].source_id, "TwitterDev");
    assert_eq!(events[0].priority, 1);
}

#[tokio::test]
async fn twitter_delivery_with_no_usable_tweet_is_an_error() {
    let (app, bus) = test_app();
    let body = json!({"tweet_create_events": [{"text": "no id"}, {"text": "no id either"}]}).to_string();
    let sig = format!("sha256={}", signature::sign(body.as_bytes(), TW_SECRET));
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/twitter?tenant_id=t")
        .header("x-twitter-webhooks-signature", sig)
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(resp).await["error"], "publish_failed");
    assert!(bus.log.is_empty());
}

#[tokio::test]
async fn twitter_invalid_json_is_bad_request() {
    let (app, _) = test_app();
    let body = "{not json";
    let sig = signature::sign(body.as_bytes(), TW_SECRET);
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/twitter?tenant_id=t")
        .header("x-twitter-webhooks-signature", sig)
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reddit_requires_matching_key() {
    let (app, bus) = test_app();
    let posts = reddit_posts(1);

    let resp = app.clone().oneshot(reddit_post(&posts, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = app
        .clone()
        .oneshot(reddit_post(&posts, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(bus.log.is_empty());

    let resp = app.oneshot(reddit_post(&posts, Some(REDDIT_KEY))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let events = bus.log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tenant_id, "tenant-r");
    assert_eq!(events[0].source_id, "rust");
    assert_eq!(
        events[0].content_url,
        "https://www.reddit.com/r/rust/comments/1"
    );
}

#[tokio::test]
async fn batch_continues_past_a_failed_item() {
    fn third(ev: &CanonicalIngestionEvent) -> bool {
        ev.content_url.ends_with("/comments/3")
    }
    let (app, bus) = app_with(secrets(), third, AdmissionConfig::default());

    let resp = app
        .oneshot(reddit_post(&reddit_posts(5), Some(REDDIT_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = read_json(resp).await;
    assert_eq!(report["entries"], 5);
    assert_eq!(report["published"], 4);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["status"], "partial");

    let ids: Vec<String> = bus
        .log
        .events()
        .iter()
        .map(|e| e.metadata["post_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["p1", "p2", "p4", "p5"], "bus keeps arrival order");
}

/// Never acknowledges the post with id `stuck`.
struct Stuck {
    log: MemoryBus,
    stuck: &'static str,
}

#[async_trait]
impl BusTransport for Stuck {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError> {
        if record.event()?.metadata["post_id"] == self.stuck {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.log.send(record, settings).await
    }
}

#[tokio::test(start_paused = true)]
async fn slow_bus_is_cut_off_at_the_delivery_deadline() {
    let bus = Arc::new(Stuck {
        log: MemoryBus::new(),
        stuck: "p2",
    });
    let publisher = Arc::new(BusPublisher::new(Arc::clone(&bus), ProducerSettings::default()));
    let gateway = GatewayState::new(publisher.clone(), secrets()).with_deadline(Duration::from_secs(2));
    let state = AppState::new(
        gateway,
        Arc::new(FeedPoller::new(publisher)),
        AdmissionControl::new(AdmissionConfig::default()),
    );
    let app = api::router(state);

    let started = tokio::time::Instant::now();
    let resp = app
        .oneshot(reddit_post(&reddit_posts(3), Some(REDDIT_KEY)))
        .await
        .unwrap();
    assert!(started.elapsed() <= Duration::from_secs(3), "answered near the deadline");
    assert_eq!(resp.status(), StatusCode::OK);
    let report = read_json(resp).await;
    assert_eq!(report["status"], "partial");
    assert_eq!(report["published"], 1);
    assert_eq!(report["failed"], 2);
    assert_eq!(bus.log.len(), 1);
}

#[tokio::test]
async fn batch_with_zero_successes_is_service_unavailable() {
    fn everything(_: &CanonicalIngestionEvent) -> bool {
        true
    }
    let (app, bus) = app_with(secrets(), everything, AdmissionConfig::default());

    let resp = app
        .oneshot(reddit_post(&reddit_posts(3), Some(REDDIT_KEY)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err = read_json(resp).await;
    assert_eq!(err["error"], "publish_failed");
    assert!(bus.log.is_empty());
}

#[tokio::test]
async fn api_ingest_queues_event_with_default_priority() {
    let (app, bus) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest")
        .header("x-tenant-id", "tenant-api")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "source_type": "rss",
                "source_id": "https://blog.example.com/feed",
                "content_url": "https://blog.example.com/posts/1",
                "metadata": {"title": "Manual"}
            })
            .to_string(),
        ))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let v = read_json(resp).await;
    assert_eq!(v["status"], "queued");
    assert_eq!(v["key"], "tenant-api/rss/https://blog.example.com/feed");

    let events = bus.log.events();
    assert_eq!(events[0].priority, 5);
    assert_eq!(events[0].metadata["title"], "Manual");
}

#[tokio::test]
async fn api_ingest_rejects_bad_input() {
    let (app, bus) = test_app();
    let cases = [
        json!({"source_type": "rss", "content_url": "https://a/1", "priority": 11}).to_string(),
        json!({"source_type": "rss", "content_url": "https://a/1", "priority": 0}).to_string(),
        json!({"source_type": "rss", "content_url": "  "}).to_string(),
        json!({"source_type": "myspace", "content_url": "https://a/1"}).to_string(),
        "{broken".to_string(),
    ];
    for body in cases {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/ingest?tenant_id=t")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.clone()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }
    assert!(bus.log.is_empty());
}

#[tokio::test]
async fn admission_rejects_excess_requests_with_retry_after() {
    let (app, _) = app_with(
        secrets(),
        accept_all,
        AdmissionConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        },
    );
    let handshake = || {
        Request::builder()
            .uri("/webhooks/youtube?hub.mode=subscribe&hub.challenge=c")
            .header("x-tenant-id", "tenant-a")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let resp = app.clone().oneshot(handshake()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app.clone().oneshot(handshake()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = resp.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry));

    // Health is outside admission control.
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn admission_buckets_follow_resolved_tenant_and_peer() {
    let (app, _) = app_with(
        secrets(),
        accept_all,
        AdmissionConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        },
    );
    let handshake = |tenant_query: &str, peer: Option<&str>| {
        let mut req = Request::builder()
            .uri(format!(
                "/webhooks/youtube?hub.mode=subscribe&hub.challenge=c{tenant_query}"
            ))
            .body(Body::empty())
            .unwrap();
        if let Some(peer) = peer {
            let addr: std::net::SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(axum::extract::ConnectInfo(addr));
        }
        req
    };

    // Header-less clients are told apart by their peer address.
    let a = app.clone().oneshot(handshake("&tenant_id=acme", Some("192.0.2.1:4000"))).await.unwrap();
    let b = app.clone().oneshot(handshake("&tenant_id=acme", Some("192.0.2.2:4000"))).await.unwrap();
    assert_eq!((a.status(), b.status()), (StatusCode::OK, StatusCode::OK));

    // A percent-encoded query names the same tenant as the decoded header.
    let first = app
        .clone()
        .oneshot(handshake("&tenant_id=big%20co", Some("192.0.2.3:4000")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let mut again = handshake("", Some("192.0.2.3:4000"));
    again
        .headers_mut()
        .insert("x-tenant-id", http::HeaderValue::from_static("big co"));
    assert_eq!(
        app.oneshot(again).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
