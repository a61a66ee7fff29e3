//! VAPID key generation for Web Push (RFC 8292).
//!
//! Generates the process-wide P-256 ECDSA keypair. The private key is
//! supplied back to the process via `CAPGATE_VAPID_PRIVATE_KEY`; the
//! public key is distributed to subscribing browsers out-of-band.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};

/// VAPID keypair for web push authentication.
///
/// The private key is a P-256 ECDSA signing key stored as the raw
/// 32-byte scalar (base64url); the public key is the uncompressed SEC1
/// point (65 bytes). The raw-scalar format is exactly what the web-push
/// crate's `VapidSignatureBuilder::from_base64()` expects — DER forms
/// are rejected there.
#[derive(Debug, Serialize, Deserialize)]
pub struct VapidKeys {
    /// Raw 32-byte P-256 private key scalar (base64url).
    private_key_b64: String,
    /// Uncompressed public key bytes (base64url, 65 bytes decoded).
    public_key_b64: String,
}

impl VapidKeys {
    /// Generate a fresh VAPID keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        // SEC1 uncompressed public key (65 bytes: 0x04 || x || y)
        let public_bytes = verifying_key.to_encoded_point(false);

        Self {
            private_key_b64: BASE64URL.encode(signing_key.to_bytes().as_slice()),
            public_key_b64: BASE64URL.encode(public_bytes.as_bytes()),
        }
    }

    /// Reconstruct from base64url-encoded strings (e.g., configuration).
    ///
    /// Validates both the public point format and that the private key is
    /// a valid P-256 scalar.
    pub fn from_base64url(public_key_b64: &str, private_key_b64: &str) -> Result<Self> {
        let pub_bytes = BASE64URL
            .decode(public_key_b64)
            .context("Invalid base64url for VAPID public key")?;
        anyhow::ensure!(
            pub_bytes.len() == 65 && pub_bytes[0] == 0x04,
            "VAPID public key must be 65-byte uncompressed P-256 point"
        );

        let priv_bytes = BASE64URL
            .decode(private_key_b64)
            .context("Invalid base64url for VAPID private key")?;
        anyhow::ensure!(
            priv_bytes.len() == 32,
            "VAPID private key must be 32-byte P-256 scalar, got {} bytes",
            priv_bytes.len()
        );
        SigningKey::from_bytes(priv_bytes.as_slice().into())
            .context("VAPID private key is not a valid P-256 scalar")?;

        Ok(Self {
            private_key_b64: private_key_b64.to_string(),
            public_key_b64: public_key_b64.to_string(),
        })
    }

    /// Base64url-encoded uncompressed public key (65 bytes decoded).
    ///
    /// This is what browsers pass as the `applicationServerKey` when
    /// subscribing.
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// Base64url-encoded raw 32-byte private key scalar.
    pub fn private_key_base64url(&self) -> &str {
        &self.private_key_b64
    }

    /// Uncompressed public key bytes (65 bytes).
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        BASE64URL
            .decode(&self.public_key_b64)
            .context("Failed to decode VAPID public key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_vapid_keys() {
        let keys = VapidKeys::generate();

        let pub_bytes = keys.public_key_bytes().expect("decode public key");
        assert_eq!(pub_bytes.len(), 65, "uncompressed P-256 public key is 65 bytes");
        assert_eq!(pub_bytes[0], 0x04, "uncompressed point starts with 0x04");

        let priv_bytes = BASE64URL
            .decode(keys.private_key_base64url())
            .expect("decode private key");
        assert_eq!(priv_bytes.len(), 32, "raw P-256 scalar is 32 bytes");
    }

    #[test]
    fn test_from_base64url_roundtrip() {
        let keys = VapidKeys::generate();
        let reconstructed = VapidKeys::from_base64url(
            keys.public_key_base64url(),
            keys.private_key_base64url(),
        )
        .expect("should reconstruct from base64url");

        assert_eq!(
            keys.public_key_base64url(),
            reconstructed.public_key_base64url()
        );
        assert_eq!(
            keys.private_key_base64url(),
            reconstructed.private_key_base64url(),
        );
    }

    #[test]
    fn test_key_format_accepted_by_web_push() {
        use web_push::{SubscriptionInfo, VapidSignatureBuilder};

        let keys = VapidKeys::generate();
        let sub = SubscriptionInfo::new(
            "https://push.example.com/test",
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "AAAAAAAAAAAAAAAAAAAAAA",
        );
        let builder = VapidSignatureBuilder::from_base64(keys.private_key_base64url(), &sub);
        assert!(builder.is_ok(), "from_base64 should accept the raw key scalar");
    }

    #[test]
    fn test_from_base64url_rejects_invalid() {
        assert!(VapidKeys::from_base64url("not-valid-key", "also-bad").is_err());

        // Structurally valid base64 but wrong decoded lengths
        let short_pub = BASE64URL.encode([4u8; 10]);
        let short_priv = BASE64URL.encode([1u8; 16]);
        assert!(VapidKeys::from_base64url(&short_pub, &short_priv).is_err());
    }

    #[test]
    fn test_keys_are_unique() {
        let a = VapidKeys::generate();
        let b = VapidKeys::generate();
        assert_ne!(a.private_key_base64url(), b.private_key_base64url());
    }
}
