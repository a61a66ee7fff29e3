//! Web push delivery infrastructure.
//!
//! Delivers encrypted push messages (RFC 8030) straight from this
//! process to browser push services, authenticated with VAPID (RFC
//! 8292) and encrypted per RFC 8291 so only the subscribing browser can
//! read the payload. No persistent connection to the browser is needed.
//!
//! # Architecture
//!
//! ```text
//! Storefront event (order update, chat message, loyalty tier change)
//!     ↓
//! SubscriptionRegistry — which browsers of this user are reachable
//!     ↓
//! PushClient — encrypt payload, sign VAPID token, POST to push service
//!     ↓
//! Push service delivers to the browser's service worker
//! ```
//!
//! # Keys
//!
//! One process-wide P-256 VAPID keypair, generated once. The private
//! scalar stays in configuration; the public half is handed to browsers
//! out-of-band as the `applicationServerKey` they subscribe with. Each
//! subscription additionally carries its own ECDH public key and
//! 16-byte auth secret, both minted by the browser.

pub mod delivery;
pub mod registry;
pub mod vapid;

pub use delivery::{DeliveryReport, PushClient, PushError, PushMessage, Urgency};
pub use registry::{PushSubscription, SubscriptionRegistry, SubscriptionState};
pub use vapid::VapidKeys;
