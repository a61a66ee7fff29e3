//! Encrypted, authenticated web push delivery.
//!
//! Each outbound message is encrypted per RFC 8291 (`aes128gcm`) under
//! the subscription's ECDH key and auth secret, authorized with a VAPID
//! JWT (RFC 8292) scoped to the push service's origin, and POSTed with
//! `TTL`/`Urgency` headers. The `web-push` crate performs encryption and
//! VAPID signing; the HTTP request goes out via a pooled `reqwest`
//! client so response status codes can drive subscription lifecycle
//! directly.
//!
//! Transient failures (network errors, 429, 5xx) retry with bounded
//! exponential backoff; terminal responses never retry and instead feed
//! the registry's state machine.

use futures_util::{stream, StreamExt};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use web_push::{ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessageBuilder};

use crate::config::Config;
use crate::constants::{
    DEFAULT_PUSH_TTL_SECS, MAX_PUSH_PAYLOAD, PUSH_MAX_ATTEMPTS, PUSH_MAX_CONCURRENT,
    PUSH_REQUEST_TIMEOUT, PUSH_RETRY_BASE_DELAY,
};
use crate::push::registry::{PushSubscription, SubscriptionRegistry};
use crate::push::vapid::VapidKeys;

/// Errors from push delivery.
#[derive(Debug)]
pub enum PushError {
    /// VAPID keys absent from configuration.
    NotConfigured,
    /// Plaintext exceeds the push service payload budget; caller must
    /// shrink the payload, never retried.
    PayloadTooLarge(usize),
    /// The push service no longer knows the endpoint (404/410).
    /// Terminal; triggers revocation.
    SubscriptionGone,
    /// Network error or 429/5xx that survived all retry attempts.
    Transient {
        /// Last HTTP status observed, if the request got that far.
        status: Option<u16>,
        /// Last error description.
        message: String,
    },
    /// A 4xx the push service will keep returning (bad token, bad
    /// crypto headers). Not retried.
    Rejected {
        /// The HTTP status returned.
        status: u16,
    },
    /// Encryption or VAPID signing failed before any network traffic.
    Protocol(String),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "VAPID keys not configured"),
            Self::PayloadTooLarge(len) => {
                write!(f, "Payload of {len} bytes exceeds {MAX_PUSH_PAYLOAD}-byte limit")
            }
            Self::SubscriptionGone => write!(f, "Subscription gone"),
            Self::Transient { status, message } => match status {
                Some(code) => write!(f, "Transient delivery failure (HTTP {code}): {message}"),
                None => write!(f, "Transient delivery failure: {message}"),
            },
            Self::Rejected { status } => write!(f, "Push service rejected delivery (HTTP {status})"),
            Self::Protocol(msg) => write!(f, "Push protocol error: {msg}"),
        }
    }
}

impl std::error::Error for PushError {}

/// Message urgency, forwarded to the push service as the `Urgency` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Urgency {
    /// Deliver only on cheap connections (e.g., topology updates).
    VeryLow,
    /// Deliver on power-friendly schedules.
    Low,
    /// Default delivery.
    #[default]
    Normal,
    /// Time-critical, wake the device.
    High,
}

impl Urgency {
    /// Header value per RFC 8030 §5.3.
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single push message. Transient: constructed per send, never stored.
#[derive(Clone, Debug)]
pub struct PushMessage {
    /// Plaintext payload handed to the service worker after decryption.
    pub payload: Vec<u8>,
    /// Seconds the push service may hold the message for an offline device.
    pub ttl_secs: u32,
    /// Delivery urgency.
    pub urgency: Urgency,
}

impl PushMessage {
    /// A message with default TTL and urgency.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ttl_secs: DEFAULT_PUSH_TTL_SECS,
            urgency: Urgency::default(),
        }
    }

    /// Override the TTL.
    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Override the urgency.
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }
}

/// Outcome summary of a fan-out to one user's subscriptions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Successful deliveries.
    pub delivered: usize,
    /// Failed deliveries (transient exhausted or rejected).
    pub failed: usize,
    /// Subscriptions revoked because the service reported them gone.
    pub revoked: usize,
    /// Sends abandoned by cancellation before completing.
    pub cancelled: usize,
}

/// Sends encrypted web push messages authorized with this process's
/// VAPID keypair.
///
/// Construct once at startup and reuse: the inner `reqwest` client pools
/// connections across deliveries.
#[derive(Debug)]
pub struct PushClient {
    client: reqwest::Client,
    vapid: Option<VapidKeys>,
    subject: String,
}

impl PushClient {
    /// Build a client around explicit VAPID keys.
    pub fn new(vapid: VapidKeys, subject: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            vapid: Some(vapid),
            subject: subject.into(),
        }
    }

    /// Build from configuration; missing keys leave push disabled, a
    /// malformed key pair is an error.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let vapid = match (config.vapid_public_key(), config.vapid_private_key()) {
            (Some(public), Some(private)) => Some(VapidKeys::from_base64url(public, private)?),
            _ => None,
        };
        Ok(Self {
            client: http_client(),
            vapid,
            subject: config.vapid_subject().to_string(),
        })
    }

    /// Whether VAPID keys are configured.
    pub fn is_configured(&self) -> bool {
        self.vapid.is_some()
    }

    /// Encrypt, sign, and deliver one message to one subscription.
    ///
    /// Pure delivery: registry state is not touched here. Use
    /// [`apply_outcome`] (or [`send_to_user`](Self::send_to_user)) to
    /// feed the result back into the lifecycle.
    pub async fn send(
        &self,
        subscription: &PushSubscription,
        message: &PushMessage,
    ) -> Result<(), PushError> {
        let vapid = self.vapid.as_ref().ok_or(PushError::NotConfigured)?;

        if message.payload.len() > MAX_PUSH_PAYLOAD {
            return Err(PushError::PayloadTooLarge(message.payload.len()));
        }

        let sub_info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh,
            &subscription.auth,
        );

        let mut sig_builder =
            VapidSignatureBuilder::from_base64(vapid.private_key_base64url(), &sub_info)
                .map_err(|e| PushError::Protocol(format!("VAPID signature setup: {e}")))?;
        sig_builder.add_claim("sub", self.subject.as_str());
        let signature = sig_builder
            .build()
            .map_err(|e| PushError::Protocol(format!("VAPID JWT signing: {e}")))?;

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &message.payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(message.ttl_secs);

        // build() performs the RFC 8291 encryption; do it once and reuse
        // the ciphertext across retry attempts.
        let wire = builder
            .build()
            .map_err(|e| PushError::Protocol(format!("payload encryption: {e}")))?;

        let mut last_transient = None;
        for attempt in 1..=PUSH_MAX_ATTEMPTS {
            // Request built manually: TTL/Urgency come from our message,
            // and the response status feeds the lifecycle mapping.
            let mut request = self
                .client
                .post(wire.endpoint.to_string())
                .header("TTL", message.ttl_secs.to_string())
                .header("Urgency", message.urgency.as_str());

            if let Some(payload) = &wire.payload {
                request = request.header("Content-Encoding", payload.content_encoding.to_str());
                for (key, value) in &payload.crypto_headers {
                    request = request.header(*key, value.as_str());
                }
                request = request.body(payload.content.clone());
            }

            let transient = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match status {
                        200..=299 => return Ok(()),
                        404 | 410 => return Err(PushError::SubscriptionGone),
                        429 | 500..=599 => {
                            let body = response.text().await.unwrap_or_default();
                            PushError::Transient {
                                status: Some(status),
                                message: body,
                            }
                        }
                        _ => return Err(PushError::Rejected { status }),
                    }
                }
                Err(e) => PushError::Transient {
                    status: None,
                    message: e.to_string(),
                },
            };

            log::warn!(
                "[WebPush] Delivery attempt {attempt}/{PUSH_MAX_ATTEMPTS} to {} failed: {transient}",
                subscription.id
            );
            last_transient = Some(transient);

            if attempt < PUSH_MAX_ATTEMPTS {
                let backoff = PUSH_RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_transient.unwrap_or(PushError::Transient {
            status: None,
            message: "no delivery attempt completed".to_string(),
        }))
    }

    /// Deliver one message to every active subscription of a user.
    ///
    /// Fan-out runs concurrently with a bounded in-flight limit so a
    /// single slow endpoint cannot stall the rest. Cancelling the token
    /// abandons sends that have not finished; every completed send still
    /// gets its state transition applied atomically per-subscription, so
    /// cancellation never leaves a half-updated record.
    pub async fn send_to_user(
        &self,
        registry: &Arc<RwLock<SubscriptionRegistry>>,
        user_id: &str,
        message: &PushMessage,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let targets: Vec<PushSubscription> = {
            let reg = registry.read().unwrap_or_else(|e| e.into_inner());
            reg.active_for_user(user_id).cloned().collect()
        };

        let mut outcomes = stream::iter(targets)
            .map(|sub| async move {
                tokio::select! {
                    () = cancel.cancelled() => (sub.id, None),
                    result = self.send(&sub, message) => (sub.id, Some(result)),
                }
            })
            .buffer_unordered(PUSH_MAX_CONCURRENT);

        let mut report = DeliveryReport::default();
        while let Some((id, outcome)) = outcomes.next().await {
            match outcome {
                None => report.cancelled += 1,
                Some(result) => {
                    match &result {
                        Ok(()) => report.delivered += 1,
                        Err(PushError::SubscriptionGone) => report.revoked += 1,
                        Err(_) => report.failed += 1,
                    }
                    let mut reg = registry.write().unwrap_or_else(|e| e.into_inner());
                    apply_outcome(&mut reg, id, &result);
                }
            }
        }
        report
    }
}

/// Map one delivery outcome onto the subscription lifecycle.
///
/// Configuration and payload errors are the sender's fault and leave the
/// subscription untouched; everything else feeds the registry's failure
/// policy.
pub fn apply_outcome(
    registry: &mut SubscriptionRegistry,
    id: Uuid,
    outcome: &Result<(), PushError>,
) {
    match outcome {
        Ok(()) => registry.mark_delivered(id),
        Err(PushError::SubscriptionGone) => registry.mark_failed(id, Some(410)),
        Err(PushError::Transient { status, .. }) => registry.mark_failed(id, *status),
        Err(PushError::Rejected { status }) => registry.mark_failed(id, Some(*status)),
        Err(PushError::NotConfigured | PushError::PayloadTooLarge(_) | PushError::Protocol(_)) => {}
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PUSH_REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::registry::SubscriptionState;

    fn subscription(registry: &mut SubscriptionRegistry) -> Uuid {
        registry.register("https://push.example.com/1", "k", "a", "user-a")
    }

    #[test]
    fn test_apply_outcome_success() {
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        apply_outcome(&mut reg, id, &Ok(()));
        assert!(reg.get(id).unwrap().last_used_at.is_some());
    }

    #[test]
    fn test_apply_outcome_gone_revokes() {
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        apply_outcome(&mut reg, id, &Err(PushError::SubscriptionGone));
        assert_eq!(reg.get(id).unwrap().state, SubscriptionState::Revoked);
    }

    #[test]
    fn test_apply_outcome_transient_counts_toward_stale() {
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        let err: Result<(), PushError> = Err(PushError::Transient {
            status: Some(503),
            message: "unavailable".to_string(),
        });
        apply_outcome(&mut reg, id, &err);
        apply_outcome(&mut reg, id, &err);
        apply_outcome(&mut reg, id, &err);
        assert_eq!(reg.get(id).unwrap().state, SubscriptionState::Stale);
    }

    #[test]
    fn test_apply_outcome_sender_errors_leave_state_alone() {
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        apply_outcome(&mut reg, id, &Err(PushError::PayloadTooLarge(9000)));
        apply_outcome(&mut reg, id, &Err(PushError::NotConfigured));
        let sub = reg.get(id).unwrap();
        assert_eq!(sub.state, SubscriptionState::Active);
        assert_eq!(sub.failure_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_network() {
        let client = PushClient::new(VapidKeys::generate(), "https://example.com");
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        let sub = reg.get(id).unwrap().clone();

        let message = PushMessage::new(vec![0u8; MAX_PUSH_PAYLOAD + 1]);
        let result = client.send(&sub, &message).await;
        assert!(matches!(result, Err(PushError::PayloadTooLarge(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_client_reports_not_configured() {
        let config_less = PushClient {
            client: http_client(),
            vapid: None,
            subject: "https://example.com".to_string(),
        };
        let mut reg = SubscriptionRegistry::new(3);
        let id = subscription(&mut reg);
        let sub = reg.get(id).unwrap().clone();

        let result = config_less.send(&sub, &PushMessage::new(b"hi".to_vec())).await;
        assert!(matches!(result, Err(PushError::NotConfigured)));
        assert!(!config_less.is_configured());
    }

    #[test]
    fn test_message_builder_defaults() {
        let msg = PushMessage::new(b"hello".to_vec());
        assert_eq!(msg.ttl_secs, DEFAULT_PUSH_TTL_SECS);
        assert_eq!(msg.urgency, Urgency::Normal);

        let msg = msg.with_ttl(60).with_urgency(Urgency::High);
        assert_eq!(msg.ttl_secs, 60);
        assert_eq!(msg.urgency, Urgency::High);
    }
}
