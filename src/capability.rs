//! Capability issuing and redemption.
//!
//! A capability is an unforgeable, scoped, time-limited token minting the
//! right to perform exactly one action (upload to one storage folder,
//! dispatch one push). The issuer combines the canonical encoder and the
//! signature engine; redemption re-encodes, verifies, and returns a
//! narrow [`ScopeGrant`] that never carries the secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::canonical::{Action, CapabilityRequest};
use crate::config::Config;
use crate::constants::NONCE_LEN;
use crate::replay::ReplayCache;
use crate::signature::{SignatureAlgorithm, SignatureEngine};

/// Errors from capability issuing and redemption.
#[derive(Debug, PartialEq, Eq)]
pub enum CapabilityError {
    /// Malformed or unsafe input; never retried.
    InvalidRequest(String),
    /// Capability past its validity window; client must re-request.
    Expired,
    /// Nonce already consumed; logged as a potential attack signal.
    Replayed,
    /// Signature does not match; tamper or secret mismatch.
    SignatureMismatch,
    /// Signing secret absent from configuration.
    NotConfigured,
}

impl CapabilityError {
    /// Caller-facing message.
    ///
    /// Verification failures collapse to an undifferentiated
    /// "unauthorized" so the response leaks nothing about which check
    /// failed; the specific reason is logged internally instead.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid request",
            Self::NotConfigured => "capability signing is not configured",
            Self::Expired | Self::Replayed | Self::SignatureMismatch => "unauthorized",
        }
    }
}

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            Self::Expired => write!(f, "Capability expired"),
            Self::Replayed => write!(f, "Nonce already consumed"),
            Self::SignatureMismatch => write!(f, "Signature mismatch"),
            Self::NotConfigured => write!(f, "Signing secret not configured"),
        }
    }
}

impl std::error::Error for CapabilityError {}

/// A capability request together with its signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCapability {
    /// The signed request.
    pub request: CapabilityRequest,
    /// HMAC over the request's canonical string.
    pub signature: Vec<u8>,
    /// Scheme the signature was produced with.
    pub algorithm: SignatureAlgorithm,
}

impl SignedCapability {
    /// Render as signed-URL query parameters.
    ///
    /// The five request fields use the exact canonical encoding, so a
    /// third-party verifier reconstructing the canonical string from the
    /// URL sees byte-for-byte what was signed; `algorithm` and the hex
    /// `signature` ride alongside.
    pub fn to_query_string(&self) -> Result<String, CapabilityError> {
        let canonical = self.request.canonical_string()?;
        Ok(format!(
            "{canonical}&algorithm={}&signature={}",
            self.algorithm.as_str(),
            hex::encode(&self.signature),
        ))
    }

    /// Parse signed-URL query parameters back into a capability.
    ///
    /// Accepts the parameters in any order; the canonical ordering is
    /// re-imposed during verification, not trusted from the wire.
    pub fn from_query_str(query: &str) -> Result<Self, CapabilityError> {
        let mut params: HashMap<String, String> = HashMap::new();
        for pair in query.trim_start_matches('?').split('&') {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                CapabilityError::InvalidRequest(format!("malformed query pair: {pair}"))
            })?;
            let value = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| {
                    CapabilityError::InvalidRequest("query value is not valid UTF-8".to_string())
                })?
                .into_owned();
            // Last-wins overwriting would let a duplicated parameter
            // smuggle in an ambiguous reading; reject it at the parse
            // boundary.
            if params.insert(key.to_string(), value).is_some() {
                return Err(CapabilityError::InvalidRequest(format!(
                    "duplicate parameter: {key}"
                )));
            }
        }

        let get = |key: &str| -> Result<&String, CapabilityError> {
            params
                .get(key)
                .ok_or_else(|| CapabilityError::InvalidRequest(format!("missing parameter: {key}")))
        };

        let action = Action::parse(get("action")?)
            .ok_or_else(|| CapabilityError::InvalidRequest("unknown action".to_string()))?;
        // Unknown algorithm identifiers fail verification outright; there
        // is no fallback scheme.
        let algorithm = SignatureAlgorithm::parse(get("algorithm")?)
            .ok_or(CapabilityError::SignatureMismatch)?;
        let signature = hex::decode(get("signature")?)
            .map_err(|_| CapabilityError::InvalidRequest("signature is not hex".to_string()))?;

        let parse_ts = |key: &str| -> Result<DateTime<Utc>, CapabilityError> {
            let secs: i64 = get(key)?
                .parse()
                .map_err(|_| CapabilityError::InvalidRequest(format!("{key} is not a timestamp")))?;
            DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| CapabilityError::InvalidRequest(format!("{key} is out of range")))
        };

        Ok(Self {
            request: CapabilityRequest {
                action,
                scope_path: get("scope_path")?.clone(),
                issued_at: parse_ts("issued_at")?,
                expires_at: parse_ts("expires_at")?,
                nonce: get("nonce")?.clone(),
            },
            signature,
            algorithm,
        })
    }
}

/// The result of a successful redemption: the allowed action and scope,
/// nothing more. Grants never carry key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeGrant {
    /// The action the holder may perform.
    pub action: Action,
    /// The scope the action is confined to.
    pub scope_path: String,
    /// When the underlying capability expires.
    pub expires_at: DateTime<Utc>,
}

/// Mints and redeems short-lived signed capabilities.
///
/// Constructed once at startup from [`Config`]; when the signing secret
/// is absent every operation reports [`CapabilityError::NotConfigured`]
/// rather than failing unsafely.
#[derive(Debug)]
pub struct CapabilityIssuer {
    engine: Option<SignatureEngine>,
}

impl CapabilityIssuer {
    /// Build an issuer around an explicit secret.
    pub fn new(secret: &[u8], replay: Arc<ReplayCache>) -> Self {
        Self {
            engine: Some(SignatureEngine::new(secret, replay)),
        }
    }

    /// Build an issuer from configuration; a missing secret leaves the
    /// capability disabled.
    pub fn from_config(config: &Config, replay: Arc<ReplayCache>) -> Self {
        match config.signing_secret() {
            Some(secret) => Self::new(secret, replay),
            None => Self { engine: None },
        }
    }

    /// Whether a signing secret is configured.
    pub fn is_configured(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<&SignatureEngine, CapabilityError> {
        self.engine.as_ref().ok_or(CapabilityError::NotConfigured)
    }

    /// Mint a capability for one action on one scope, valid for `ttl`.
    pub fn issue(
        &self,
        action: Action,
        scope_path: &str,
        ttl: Duration,
    ) -> Result<SignedCapability, CapabilityError> {
        self.issue_at(action, scope_path, ttl, Utc::now())
    }

    /// [`issue`](Self::issue) with an explicit clock, for deterministic tests.
    pub fn issue_at(
        &self,
        action: Action,
        scope_path: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<SignedCapability, CapabilityError> {
        let engine = self.engine()?;

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CapabilityError::InvalidRequest("ttl out of range".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let request = CapabilityRequest {
            action,
            scope_path: scope_path.to_string(),
            issued_at: now,
            expires_at: now + ttl,
            nonce: BASE64URL.encode(nonce_bytes),
        };

        let canonical = request.canonical_string()?;
        let signature = engine.sign(&canonical);

        Ok(SignedCapability {
            request,
            signature,
            algorithm: SignatureAlgorithm::HmacSha256,
        })
    }

    /// Verify a presented capability and convert it into a grant.
    ///
    /// On success the nonce is recorded in the replay cache, making the
    /// capability single-use. The specific refusal reason is logged for
    /// audit; callers should surface only
    /// [`CapabilityError::public_message`].
    pub fn redeem(&self, capability: &SignedCapability) -> Result<ScopeGrant, CapabilityError> {
        self.redeem_at(capability, Utc::now())
    }

    /// [`redeem`](Self::redeem) with an explicit clock, for deterministic tests.
    pub fn redeem_at(
        &self,
        capability: &SignedCapability,
        now: DateTime<Utc>,
    ) -> Result<ScopeGrant, CapabilityError> {
        let engine = self.engine()?;

        if let Err(err) = engine.verify_request(
            &capability.request,
            capability.algorithm,
            &capability.signature,
            now,
        ) {
            match &err {
                CapabilityError::Replayed => log::warn!(
                    "[Capability] replay detected for scope {}: possible token capture",
                    capability.request.scope_path
                ),
                CapabilityError::SignatureMismatch => log::warn!(
                    "[Capability] signature mismatch for scope {}",
                    capability.request.scope_path
                ),
                other => log::info!("[Capability] redemption refused: {other}"),
            }
            return Err(err);
        }

        Ok(ScopeGrant {
            action: capability.request.action,
            scope_path: capability.request.scope_path.clone(),
            expires_at: capability.request.expires_at,
        })
    }
}
