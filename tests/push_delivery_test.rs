//! End-to-end push delivery tests against a mock push service.
//!
//! Verifies the wire contract (TTL/Urgency/Content-Encoding headers,
//! VAPID Authorization, encrypted body) and the mapping from HTTP
//! responses to subscription lifecycle transitions.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use capgate::constants::PUSH_MAX_ATTEMPTS;
use capgate::{
    PushClient, PushMessage, SubscriptionRegistry, SubscriptionState, Urgency, VapidKeys,
};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Browser-side subscription keys: a real P-256 point and 16-byte auth
/// secret, since the client encrypts against them before any HTTP.
fn subscriber_keys() -> (String, String) {
    let secret = p256::SecretKey::random(&mut OsRng);
    let point = secret.public_key().to_encoded_point(false);
    let p256dh = BASE64URL.encode(point.as_bytes());

    let mut auth = [0u8; 16];
    rand::rng().fill_bytes(&mut auth);
    (p256dh, BASE64URL.encode(auth))
}

fn registry_with_subscription(endpoint: &str) -> (Arc<RwLock<SubscriptionRegistry>>, Uuid) {
    let (p256dh, auth) = subscriber_keys();
    let mut reg = SubscriptionRegistry::new(3);
    let id = reg.register(endpoint, &p256dh, &auth, "user-a");
    (Arc::new(RwLock::new(reg)), id)
}

fn client() -> PushClient {
    PushClient::new(VapidKeys::generate(), "https://shop.example.com")
}

#[tokio::test]
async fn successful_delivery_carries_wire_contract_and_updates_registry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/sub-1"))
        .and(header("TTL", "60"))
        .and(header("Urgency", "high"))
        .and(header("Content-Encoding", "aes128gcm"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/sub-1", server.uri());
    let (registry, id) = registry_with_subscription(&endpoint);

    let message = PushMessage::new(b"order #42 shipped".to_vec())
        .with_ttl(60)
        .with_urgency(Urgency::High);
    let report = client()
        .send_to_user(&registry, "user-a", &message, &CancellationToken::new())
        .await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    let reg = registry.read().unwrap();
    let sub = reg.get(id).unwrap();
    assert_eq!(sub.state, SubscriptionState::Active);
    assert!(sub.last_used_at.is_some(), "delivery stamps last_used_at");
}

#[tokio::test]
async fn gone_endpoint_revokes_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1) // terminal responses are never retried
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/sub-2", server.uri());
    let (registry, id) = registry_with_subscription(&endpoint);

    let report = client()
        .send_to_user(
            &registry,
            "user-a",
            &PushMessage::new(b"hello".to_vec()),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.revoked, 1);
    let reg = registry.read().unwrap();
    assert_eq!(reg.get(id).unwrap().state, SubscriptionState::Revoked);
    assert_eq!(
        reg.active_for_user("user-a").count(),
        0,
        "revoked subscriptions leave the active list"
    );
}

#[tokio::test]
async fn server_errors_retry_then_accumulate_to_stale() {
    let server = MockServer::start().await;
    // Three send calls, each retried to the attempt limit; once stale,
    // the subscription is skipped so no further requests arrive.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3 * PUSH_MAX_ATTEMPTS as u64)
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/sub-3", server.uri());
    let (registry, id) = registry_with_subscription(&endpoint);
    let client = client();
    let message = PushMessage::new(b"hello".to_vec()).with_ttl(30);

    for round in 1..=3u32 {
        let report = client
            .send_to_user(&registry, "user-a", &message, &CancellationToken::new())
            .await;
        assert_eq!(report.failed, 1, "round {round} should fail");
    }

    {
        let reg = registry.read().unwrap();
        let sub = reg.get(id).unwrap();
        assert_eq!(sub.state, SubscriptionState::Stale);
        assert_eq!(sub.failure_count, 3);
    }

    // A stale subscription is skipped entirely on the next fan-out
    let report = client
        .send_to_user(&registry, "user-a", &message, &CancellationToken::new())
        .await;
    assert_eq!(report.delivered + report.failed + report.revoked, 0);
}

#[tokio::test]
async fn cancelled_fanout_leaves_state_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/sub-4", server.uri());
    let (registry, id) = registry_with_subscription(&endpoint);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = client()
        .send_to_user(
            &registry,
            "user-a",
            &PushMessage::new(b"hello".to_vec()),
            &cancel,
        )
        .await;

    assert_eq!(report.cancelled, 1);
    assert_eq!(report.delivered, 0);

    let reg = registry.read().unwrap();
    let sub = reg.get(id).unwrap();
    assert_eq!(sub.state, SubscriptionState::Active, "no transition applied");
    assert_eq!(sub.failure_count, 0);
    assert!(sub.last_used_at.is_none());
}

#[tokio::test]
async fn slow_endpoint_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/slow"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(800)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/push/fast"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let (p256dh_a, auth_a) = subscriber_keys();
    let (p256dh_b, auth_b) = subscriber_keys();
    let mut reg = SubscriptionRegistry::new(3);
    reg.register(&format!("{}/push/slow", server.uri()), &p256dh_a, &auth_a, "user-a");
    reg.register(&format!("{}/push/fast", server.uri()), &p256dh_b, &auth_b, "user-a");
    let registry = Arc::new(RwLock::new(reg));

    let started = std::time::Instant::now();
    let report = client()
        .send_to_user(
            &registry,
            "user-a",
            &PushMessage::new(b"hello".to_vec()),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.delivered, 2);
    // Concurrent dispatch: total time tracks the slowest endpoint, not the sum
    assert!(
        started.elapsed() < Duration::from_millis(1600),
        "fan-out took {:?}, deliveries appear serialized",
        started.elapsed()
    );
}
