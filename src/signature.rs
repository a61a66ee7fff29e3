//! Keyed-hash signing and verification over canonical strings.
//!
//! HMAC-SHA256 only. The legacy 160-bit digest sometimes seen in
//! third-party signing schemes is not offered; the algorithm identifier
//! travels with every signed capability so a verifier can reject schemes
//! it does not recognize instead of guessing.
//!
//! Verification is constant-time and additionally enforces the validity
//! window and replay protection via [`ReplayCache`].

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::canonical::CapabilityRequest;
use crate::capability::CapabilityError;
use crate::replay::ReplayCache;

type HmacSha256 = Hmac<Sha256>;

/// Identifier of the signature scheme carried alongside every signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    /// HMAC with SHA-256 (256-bit output).
    HmacSha256,
}

impl SignatureAlgorithm {
    /// Wire representation used in signed URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureAlgorithm::HmacSha256 => "hmac-sha256",
        }
    }

    /// Parse the wire representation. Unknown identifiers yield `None`
    /// and must fail verification, never fall back to another scheme.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hmac-sha256" => Some(SignatureAlgorithm::HmacSha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signs and verifies canonical strings with a shared secret.
///
/// The secret is zeroed on drop. Signing and verification are pure
/// CPU-bound operations and safe to run fully in parallel; the only
/// shared mutable state is the replay cache.
pub struct SignatureEngine {
    secret: Zeroizing<Vec<u8>>,
    replay: Arc<ReplayCache>,
}

impl std::fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl SignatureEngine {
    /// Create an engine around a shared secret and a replay cache.
    pub fn new(secret: &[u8], replay: Arc<ReplayCache>) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
            replay,
        }
    }

    /// The replay cache this engine records consumed nonces in.
    pub fn replay_cache(&self) -> &Arc<ReplayCache> {
        &self.replay
    }

    /// Compute the HMAC-SHA256 signature of a canonical string.
    pub fn sign(&self, canonical: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time signature check.
    ///
    /// The comparison runs over the full digest regardless of where a
    /// mismatch occurs; only the length check short-circuits, and length
    /// is not secret.
    pub fn verify(&self, canonical: &str, candidate: &[u8]) -> bool {
        let expected = self.sign(canonical);
        expected.ct_eq(candidate).into()
    }

    /// Full verification of a signed request: signature, validity
    /// window, and replay protection, in that order.
    ///
    /// On success the `(nonce, scope_path)` pair is recorded in the
    /// replay cache, so a second call with the same request fails with
    /// [`CapabilityError::Replayed`]. Two calls racing on the identical
    /// nonce have exactly one winner.
    pub fn verify_request(
        &self,
        request: &CapabilityRequest,
        algorithm: SignatureAlgorithm,
        signature: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), CapabilityError> {
        // Only one algorithm exists today; the match keeps the rejection
        // path explicit when a second one lands.
        match algorithm {
            SignatureAlgorithm::HmacSha256 => {}
        }

        let canonical = request.canonical_string()?;

        if !self.verify(&canonical, signature) {
            return Err(CapabilityError::SignatureMismatch);
        }

        if now > request.expires_at {
            return Err(CapabilityError::Expired);
        }

        if !self
            .replay
            .check_and_insert(&request.nonce, &request.scope_path, request.expires_at, now)
        {
            return Err(CapabilityError::Replayed);
        }

        Ok(())
    }
}
