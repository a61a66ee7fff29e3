//! Push subscription storage and lifecycle.
//!
//! Stores browser push subscriptions per user with explicit lifecycle
//! states. Registration is idempotent on the endpoint URL: a browser
//! re-registering the same endpoint rotates its keys in place instead of
//! duplicating the entry. Delivery outcomes feed back through
//! [`SubscriptionRegistry::mark_delivered`] and
//! [`SubscriptionRegistry::mark_failed`]; a `404`/`410` from the push
//! service revokes the subscription immediately, repeated other failures
//! turn it stale.
//!
//! Snapshots persist to disk as a sealed AES-256-GCM envelope so
//! subscriptions survive restarts without the auth secrets ever touching
//! disk in the clear.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::constants::DEFAULT_STALE_THRESHOLD;
use crate::sealed::{self, SealedEnvelope};

/// Format version written into sealed registry snapshots.
const SNAPSHOT_VERSION: u8 = 1;

/// Context label bound into the snapshot seal; an envelope sealed for
/// any other purpose will not open as a registry snapshot.
const SNAPSHOT_CONTEXT: &str = "capgate-registry";

/// Lifecycle state of a push subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Deliverable.
    Active,
    /// Skipped after repeated delivery failures; can be healed by a
    /// successful delivery or explicit reactivation.
    Stale,
    /// Terminal. Unsubscribed or the push service reported the
    /// endpoint gone. Never reused, eligible for deletion.
    Revoked,
}

/// A browser's push subscription, as produced by the browser's
/// `PushSubscription` object and registered via the push surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Registry identifier.
    pub id: Uuid,
    /// Owning user. A weak reference: deleting the user does not cascade
    /// here, callers prune separately.
    pub user_id: String,
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// 16-byte shared auth secret (base64url).
    pub auth: String,
    /// Current lifecycle state.
    pub state: SubscriptionState,
    /// Consecutive delivery failures since the last success.
    pub failure_count: u32,
    /// When the browser first registered this endpoint.
    pub created_at: DateTime<Utc>,
    /// Last successful delivery, if any.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The subscription JSON a browser's `PushSubscription.toJSON()` produces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Key material minted by the browser.
    pub keys: BrowserSubscriptionKeys,
}

/// The `keys` object of a browser push subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserSubscriptionKeys {
    /// P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// 16-byte shared auth secret (base64url).
    pub auth: String,
}

/// In-memory registry of push subscriptions.
///
/// Plain data structure; share it behind a reader-writer lock for
/// concurrent use. Mutations require `&mut self`, so the borrow checker
/// already forbids mutating while an [`active_for_user`]
/// (Self::active_for_user) iteration is live.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionRegistry {
    /// Subscription id → subscription.
    subscriptions: HashMap<Uuid, PushSubscription>,
    /// Consecutive failures before a subscription turns stale.
    #[serde(default = "default_stale_threshold")]
    stale_threshold: u32,
}

fn default_stale_threshold() -> u32 {
    DEFAULT_STALE_THRESHOLD
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_THRESHOLD)
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry with the given stale threshold.
    pub fn new(stale_threshold: u32) -> Self {
        Self {
            subscriptions: HashMap::new(),
            stale_threshold,
        }
    }

    /// Register a browser subscription, idempotent on `endpoint`.
    ///
    /// Re-registering a live endpoint rotates its keys and owner in
    /// place and resets the lifecycle to Active. A revoked entry with
    /// the same endpoint is dropped and replaced by a fresh one — revoked
    /// subscriptions are never reused. Returns the subscription id.
    pub fn register(
        &mut self,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        user_id: &str,
    ) -> Uuid {
        let existing = self
            .subscriptions
            .values()
            .find(|sub| sub.endpoint == endpoint)
            .map(|sub| (sub.id, sub.state));

        if let Some((id, state)) = existing {
            if state == SubscriptionState::Revoked {
                self.subscriptions.remove(&id);
            } else {
                let sub = self
                    .subscriptions
                    .get_mut(&id)
                    .expect("id came from the map");
                sub.p256dh = p256dh.to_string();
                sub.auth = auth.to_string();
                sub.user_id = user_id.to_string();
                sub.state = SubscriptionState::Active;
                sub.failure_count = 0;
                log::info!("[WebPush] Rotated keys for subscription {id}");
                return id;
            }
        }

        let id = Uuid::new_v4();
        self.subscriptions.insert(
            id,
            PushSubscription {
                id,
                user_id: user_id.to_string(),
                endpoint: endpoint.to_string(),
                p256dh: p256dh.to_string(),
                auth: auth.to_string(),
                state: SubscriptionState::Active,
                failure_count: 0,
                created_at: Utc::now(),
                last_used_at: None,
            },
        );
        log::info!("[WebPush] Registered subscription {id} for user {user_id}");
        id
    }

    /// Register a subscription straight from the browser's JSON form.
    pub fn register_browser(&mut self, subscription: &BrowserSubscription, user_id: &str) -> Uuid {
        self.register(
            &subscription.endpoint,
            &subscription.keys.p256dh,
            &subscription.keys.auth,
            user_id,
        )
    }

    /// Record a successful delivery.
    ///
    /// Clears the failure counter, stamps `last_used_at`, and heals a
    /// stale subscription back to Active. Revoked stays revoked.
    pub fn mark_delivered(&mut self, id: Uuid) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            if sub.state == SubscriptionState::Revoked {
                return;
            }
            sub.failure_count = 0;
            sub.last_used_at = Some(Utc::now());
            sub.state = SubscriptionState::Active;
        }
    }

    /// Record a failed delivery attempt.
    ///
    /// `404`/`410` mean the push service no longer knows the endpoint:
    /// immediate revocation. Anything else increments the failure
    /// counter and flips the subscription to Stale at the threshold.
    pub fn mark_failed(&mut self, id: Uuid, http_status: Option<u16>) {
        let threshold = self.stale_threshold;
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            if sub.state == SubscriptionState::Revoked {
                return;
            }
            match http_status {
                Some(status @ (404 | 410)) => {
                    log::info!("[WebPush] Subscription {id} gone ({status}), revoking");
                    sub.state = SubscriptionState::Revoked;
                }
                _ => {
                    sub.failure_count += 1;
                    if sub.failure_count >= threshold && sub.state == SubscriptionState::Active {
                        log::warn!(
                            "[WebPush] Subscription {id} stale after {} consecutive failures",
                            sub.failure_count
                        );
                        sub.state = SubscriptionState::Stale;
                    }
                }
            }
        }
    }

    /// Explicit unsubscribe: terminal revocation.
    pub fn revoke(&mut self, id: Uuid) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.state = SubscriptionState::Revoked;
        }
    }

    /// Explicitly bring a stale subscription back into rotation.
    ///
    /// Only Stale transitions; Revoked is terminal.
    pub fn reactivate(&mut self, id: Uuid) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            if sub.state == SubscriptionState::Stale {
                sub.failure_count = 0;
                sub.state = SubscriptionState::Active;
            }
        }
    }

    /// Look up a subscription by id.
    pub fn get(&self, id: Uuid) -> Option<&PushSubscription> {
        self.subscriptions.get(&id)
    }

    /// Active subscriptions for one user, lazily.
    ///
    /// The borrow ties the iterator to the registry; it cannot survive a
    /// mutation.
    pub fn active_for_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> impl Iterator<Item = &'a PushSubscription> {
        self.subscriptions
            .values()
            .filter(move |sub| sub.user_id == user_id && sub.state == SubscriptionState::Active)
    }

    /// Delete revoked subscriptions. Returns how many were removed.
    pub fn prune_revoked(&mut self) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, sub| sub.state != SubscriptionState::Revoked);
        before - self.subscriptions.len()
    }

    /// Number of stored subscriptions, in any state.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Persist a sealed snapshot to `path`.
    pub fn save(&self, key: &[u8; 32], path: &Path) -> Result<()> {
        let plaintext = serde_json::to_vec(self).context("Failed to serialize registry")?;
        let envelope = sealed::seal(key, SNAPSHOT_CONTEXT, SNAPSHOT_VERSION, &plaintext)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        std::fs::write(path, serde_json::to_vec(&envelope)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Load a sealed snapshot from `path`.
    ///
    /// A missing file yields an empty registry with the given threshold;
    /// a present-but-unreadable one is an error, never silently empty.
    pub fn load(key: &[u8; 32], path: &Path, stale_threshold: u32) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(stale_threshold));
        }

        let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let envelope: SealedEnvelope =
            serde_json::from_slice(&raw).context("Snapshot envelope is not valid JSON")?;

        let plaintext = sealed::open(key, SNAPSHOT_CONTEXT, SNAPSHOT_VERSION, &envelope)?;
        let mut registry: Self =
            serde_json::from_slice(&plaintext).context("Snapshot payload is not valid JSON")?;
        registry.stale_threshold = stale_threshold;
        Ok(registry)
    }
}
