//! Sealed envelopes for state persisted at rest (AES-256-GCM).
//!
//! The subscription registry snapshot carries per-subscriber auth
//! secrets, so it is never written to disk in the clear. Each sealed
//! file is a JSON envelope:
//!
//! ```json
//! { "nonce": "<base64>", "ciphertext": "<base64>", "version": <u8> }
//! ```
//!
//! Beyond confidentiality, the cipher authenticates a caller-supplied
//! context label and the format version as associated data. A snapshot
//! resealed under a different label, or an envelope whose `version`
//! field was edited on disk, fails authentication instead of decrypting
//! into bytes a reader would misparse.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Sealed data envelope stored on disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Base64-encoded nonce (12 bytes).
    pub nonce: String,
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Format version identifier (caller-defined). Authenticated via
    /// associated data, not just stored.
    pub version: u8,
}

/// Associated data binding the context label and format version to the
/// ciphertext. Never stored; sealer and opener derive it independently.
fn binding(context: &str, version: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(context.len() + 2);
    aad.extend_from_slice(context.as_bytes());
    aad.push(0);
    aad.push(version);
    aad
}

/// Seal `plaintext` for the given context label and format version.
pub fn seal(
    key: &[u8; 32],
    context: &str,
    version: u8,
    plaintext: &[u8],
) -> Result<SealedEnvelope> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let aad = binding(context, version);
    let ciphertext = cipher
        .encrypt(
            &Nonce::from(nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("Sealing failed: {e}"))?;

    Ok(SealedEnvelope {
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
        version,
    })
}

/// Open an envelope sealed for the same context label and version.
///
/// The version gate runs first so a reader can tell "written by an
/// incompatible format revision" apart from "corrupted or wrong key";
/// every malformation is an `Err`, including a nonce of the wrong
/// length.
pub fn open(
    key: &[u8; 32],
    context: &str,
    version: u8,
    envelope: &SealedEnvelope,
) -> Result<Vec<u8>> {
    if envelope.version != version {
        bail!(
            "Unsupported sealed envelope version {} (expected {version})",
            envelope.version
        );
    }

    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .context("Invalid nonce encoding")?;
    let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "Envelope nonce is {} bytes, expected {NONCE_SIZE}",
            nonce_bytes.len()
        )
    })?;

    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .context("Invalid ciphertext encoding")?;

    let aad = binding(context, envelope.version);
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(
            &Nonce::from(nonce),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("Opening sealed data failed: {e}"))
}
