//! Capgate - capability-scoped request authorization.
//!
//! This crate provides the core functionality for the capgate CLI and
//! library: minting and verifying time-bounded, single-use signed
//! capabilities that let untrusted clients perform one narrow privileged
//! action (a direct-to-storage upload, a push dispatch) without ever
//! holding the long-lived secret, plus authenticated, encrypted web push
//! delivery to browser subscriptions.
//!
//! # Architecture
//!
//! - **Canonical encoder** - the single deterministic byte string both
//!   signer and verifier operate on
//! - **Signature engine** - HMAC-SHA256 with constant-time verification,
//!   expiry windows, and replay protection
//! - **Capability issuer** - mints and redeems scoped tokens
//! - **Subscription registry** - browser push endpoints with lifecycle
//!   states (active, stale, revoked)
//! - **Push client** - RFC 8291 encryption + VAPID authorization + HTTP
//!   delivery with bounded retries
//!
//! # Modules
//!
//! - [`canonical`] - request types and canonical encoding
//! - [`capability`] - issuing and redemption
//! - [`signature`] - signing, verification, replay enforcement
//! - [`push`] - subscription registry and delivery
//! - [`config`] - environment-supplied secret material

// Library modules
pub mod canonical;
pub mod capability;
pub mod commands;
pub mod config;
pub mod constants;
pub mod push;
pub mod replay;
pub mod sealed;
pub mod signature;

// Re-export commonly used types
pub use canonical::{Action, CapabilityRequest};
pub use capability::{CapabilityError, CapabilityIssuer, ScopeGrant, SignedCapability};
pub use config::Config;
pub use push::{
    DeliveryReport, PushClient, PushError, PushMessage, PushSubscription, SubscriptionRegistry,
    SubscriptionState, Urgency, VapidKeys,
};
pub use replay::ReplayCache;
pub use signature::{SignatureAlgorithm, SignatureEngine};
