//! Configuration loading from the process environment.
//!
//! Secret material (the capability signing secret and the VAPID key
//! pair) is supplied via environment variables at process start and held
//! in zeroize-on-drop buffers. A missing secret disables the
//! corresponding capability — the issuer and push client report
//! `NotConfigured` instead of failing unsafely.
//!
//! # Environment variables
//!
//! - `CAPGATE_SIGNING_SECRET` — shared secret for capability signatures
//! - `CAPGATE_VAPID_PRIVATE_KEY` — base64url raw 32-byte P-256 scalar
//! - `CAPGATE_VAPID_PUBLIC_KEY` — base64url 65-byte uncompressed point
//! - `CAPGATE_VAPID_SUBJECT` — VAPID `sub` claim (default site origin)
//! - `CAPGATE_STATE_KEY` — base64 32-byte key sealing the registry snapshot
//! - `CAPGATE_STATE_DIR` — where the snapshot lives (default platform config dir)
//! - `CAPGATE_STALE_THRESHOLD` — failures before a subscription goes stale

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::path::PathBuf;
use zeroize::Zeroizing;

use crate::constants::DEFAULT_STALE_THRESHOLD;

/// Default VAPID `sub` claim when none is configured.
const DEFAULT_VAPID_SUBJECT: &str = "https://capgate.example";

/// Process configuration, built once at startup and passed explicitly to
/// the constructors that need it. No ambient global lookup.
pub struct Config {
    signing_secret: Option<Zeroizing<Vec<u8>>>,
    vapid_private_b64: Option<Zeroizing<String>>,
    vapid_public_b64: Option<String>,
    vapid_subject: String,
    state_key: Option<Zeroizing<[u8; 32]>>,
    state_dir: PathBuf,
    stale_threshold: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("vapid_private_b64", &self.vapid_private_b64.as_ref().map(|_| "<redacted>"))
            .field("vapid_public_b64", &self.vapid_public_b64)
            .field("vapid_subject", &self.vapid_subject)
            .field("state_key", &self.state_key.as_ref().map(|_| "<redacted>"))
            .field("state_dir", &self.state_dir)
            .field("stale_threshold", &self.stale_threshold)
            .finish()
    }
}

impl Default for Config {
    /// A configuration with no secret material: every capability
    /// disabled, state under the current directory.
    fn default() -> Self {
        Self {
            signing_secret: None,
            vapid_private_b64: None,
            vapid_public_b64: None,
            vapid_subject: DEFAULT_VAPID_SUBJECT.to_string(),
            state_key: None,
            state_dir: PathBuf::from("."),
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// Missing secrets are not errors (they disable their capability);
    /// malformed values are, so a typo never silently downgrades to
    /// "disabled".
    pub fn from_env() -> Result<Self> {
        let signing_secret = read_env("CAPGATE_SIGNING_SECRET")
            .map(|s| Zeroizing::new(s.into_bytes()));

        let vapid_private_b64 = read_env("CAPGATE_VAPID_PRIVATE_KEY").map(Zeroizing::new);
        let vapid_public_b64 = read_env("CAPGATE_VAPID_PUBLIC_KEY");

        let vapid_subject = read_env("CAPGATE_VAPID_SUBJECT")
            .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string());

        let state_key = match read_env("CAPGATE_STATE_KEY") {
            Some(b64) => {
                let bytes = BASE64
                    .decode(b64.as_bytes())
                    .context("CAPGATE_STATE_KEY is not valid base64")?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("CAPGATE_STATE_KEY must decode to 32 bytes"))?;
                Some(Zeroizing::new(key))
            }
            None => None,
        };

        let state_dir = match read_env("CAPGATE_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("capgate"),
        };

        let stale_threshold = match read_env("CAPGATE_STALE_THRESHOLD") {
            Some(raw) => raw
                .parse()
                .context("CAPGATE_STALE_THRESHOLD is not a number")?,
            None => DEFAULT_STALE_THRESHOLD,
        };

        Ok(Self {
            signing_secret,
            vapid_private_b64,
            vapid_public_b64,
            vapid_subject,
            state_key,
            state_dir,
            stale_threshold,
        })
    }

    /// Shared secret for capability signatures, if configured.
    pub fn signing_secret(&self) -> Option<&[u8]> {
        self.signing_secret.as_deref().map(Vec::as_slice)
    }

    /// Base64url raw P-256 scalar for VAPID signing, if configured.
    pub fn vapid_private_key(&self) -> Option<&str> {
        self.vapid_private_b64.as_deref().map(String::as_str)
    }

    /// Base64url uncompressed VAPID public key, if configured.
    pub fn vapid_public_key(&self) -> Option<&str> {
        self.vapid_public_b64.as_deref()
    }

    /// VAPID `sub` claim identifying the sender to push services.
    pub fn vapid_subject(&self) -> &str {
        &self.vapid_subject
    }

    /// Key sealing the registry snapshot at rest, if configured.
    pub fn state_key(&self) -> Option<&[u8; 32]> {
        self.state_key.as_deref()
    }

    /// Directory holding persisted state.
    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Path of the sealed subscription registry snapshot.
    pub fn subscriptions_file(&self) -> PathBuf {
        self.state_dir.join("subscriptions.sealed.json")
    }

    /// Consecutive failures before a subscription turns stale.
    pub fn stale_threshold(&self) -> u32 {
        self.stale_threshold
    }
}

/// Read an env var, treating empty values as unset.
fn read_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
