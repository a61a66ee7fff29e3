//! Application-wide constants for capgate.
//!
//! Centralizes magic numbers so the signing, replay-protection, and push
//! delivery policies are discoverable in one place. Constants are grouped
//! by domain with documentation explaining their purpose.

use std::time::Duration;

// ============================================================================
// Capability signing
// ============================================================================

/// Nonce length in bytes (128 bits of CSPRNG entropy).
///
/// The nonce makes every issued capability unique so the replay cache can
/// distinguish a re-presented token from a freshly issued one.
pub const NONCE_LEN: usize = 16;

/// Default capability time-to-live.
///
/// Five minutes covers a direct-to-storage upload including slow links;
/// callers needing longer windows pass an explicit TTL at issue time.
pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(300);

/// Interval between replay-cache eviction sweeps.
///
/// Eviction also happens lazily on every insert, so the sweep only bounds
/// memory during quiet periods.
pub const REPLAY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Push delivery
// ============================================================================

/// Maximum plaintext push payload in bytes.
///
/// Push services cap the encrypted body at 4096 bytes; the aes128gcm
/// record (RFC 8188 header + padding delimiter + AEAD tag) consumes 103
/// of them, leaving 3993 for plaintext.
pub const MAX_PUSH_PAYLOAD: usize = 3993;

/// Default TTL for a push message, in seconds.
///
/// 24 hours matches the maximum VAPID token lifetime push services accept,
/// so an undelivered message never outlives the token that authorized it.
pub const DEFAULT_PUSH_TTL_SECS: u32 = 86_400;

/// Maximum delivery attempts per subscription, including the first.
///
/// Transient failures (network errors, 429, 5xx) are retried up to this
/// count; terminal responses are never retried.
pub const PUSH_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between delivery attempts.
///
/// Doubles on each retry: 250ms, then 500ms.
pub const PUSH_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Maximum number of in-flight push deliveries during a fan-out.
///
/// Bounds outbound connections so one send-to-all cannot exhaust the
/// connection pool; a single slow endpoint does not stall the others.
pub const PUSH_MAX_CONCURRENT: usize = 8;

/// HTTP request timeout for push service calls.
pub const PUSH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Subscription lifecycle
// ============================================================================

/// Consecutive delivery failures before a subscription turns stale.
///
/// Stale subscriptions are skipped on subsequent sends until a delivery
/// succeeds or they are explicitly reactivated. Overridable via
/// `CAPGATE_STALE_THRESHOLD`.
pub const DEFAULT_STALE_THRESHOLD: u32 = 3;
