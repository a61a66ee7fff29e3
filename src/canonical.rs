//! Canonical parameter encoding for capability signing.
//!
//! Signer and verifier must operate on the exact same byte string; any
//! divergence (field reordering, timestamp format drift, inconsistent
//! escaping) silently produces non-matching signatures. This module is
//! the single source of truth for that string: fields in fixed
//! alphabetical order, values percent-encoded with the strict RFC 3986
//! unreserved set, timestamps as decimal Unix seconds, no whitespace.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;

/// Percent-encode everything outside the RFC 3986 unreserved set.
///
/// `NON_ALPHANUMERIC` escapes too much on its own; unreserved characters
/// must pass through unescaped or the encoding stops being canonical
/// (third-party verifiers encode `products/123` as `products%2F123`,
/// never `products%2F%31%32%33`).
const STRICT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The privileged action a capability authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Direct upload of a file to the storage provider.
    UploadResource,
    /// Server-side dispatch of a web push message.
    SendPush,
}

impl Action {
    /// Wire representation used in canonical strings and signed URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::UploadResource => "upload-resource",
            Action::SendPush => "send-push",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload-resource" => Some(Action::UploadResource),
            "send-push" => Some(Action::SendPush),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request for a narrow, expiring capability.
///
/// This is the structure that gets canonically encoded and signed. The
/// same fields travel in the signed URL presented back at redemption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// The single action this capability authorizes.
    pub action: Action,
    /// Scope the action is confined to (e.g., a storage folder).
    pub scope_path: String,
    /// When the capability was minted.
    pub issued_at: DateTime<Utc>,
    /// When the capability stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Single-use random value (base64url, 128 bits decoded).
    pub nonce: String,
}

impl CapabilityRequest {
    /// Validate structural invariants before encoding or signing.
    ///
    /// Rejects path traversal, backslashes, absolute paths, and control
    /// characters in `scope_path`; control characters in the nonce; an
    /// empty scope for uploads; and a non-positive validity window.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        if self.expires_at <= self.issued_at {
            return Err(CapabilityError::InvalidRequest(
                "expires_at must be after issued_at".to_string(),
            ));
        }

        if self.nonce.is_empty() || self.nonce.chars().any(|c| c.is_control()) {
            return Err(CapabilityError::InvalidRequest(
                "nonce is empty or contains control characters".to_string(),
            ));
        }

        if self.action == Action::UploadResource && self.scope_path.is_empty() {
            return Err(CapabilityError::InvalidRequest(
                "scope_path must be non-empty for uploads".to_string(),
            ));
        }

        if self.scope_path.chars().any(|c| c.is_control()) {
            return Err(CapabilityError::InvalidRequest(
                "scope_path contains control characters".to_string(),
            ));
        }

        if self.scope_path.contains('\\') || self.scope_path.starts_with('/') {
            return Err(CapabilityError::InvalidRequest(
                "scope_path must be a relative forward-slash path".to_string(),
            ));
        }

        if self.scope_path.split('/').any(|seg| seg == "..") {
            return Err(CapabilityError::InvalidRequest(
                "scope_path contains a path-traversal segment".to_string(),
            ));
        }

        Ok(())
    }

    /// Produce the canonical byte string both signer and verifier sign over.
    ///
    /// Fields are emitted in fixed alphabetical order as `key=value`
    /// pairs joined by `&`. Deterministic: the same logical request
    /// always yields the identical string, across calls and restarts.
    pub fn canonical_string(&self) -> Result<String, CapabilityError> {
        self.validate()?;

        Ok(format!(
            "action={}&expires_at={}&issued_at={}&nonce={}&scope_path={}",
            self.action.as_str(),
            self.expires_at.timestamp(),
            self.issued_at.timestamp(),
            utf8_percent_encode(&self.nonce, STRICT_ENCODE_SET),
            utf8_percent_encode(&self.scope_path, STRICT_ENCODE_SET),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(scope: &str) -> CapabilityRequest {
        CapabilityRequest {
            action: Action::UploadResource,
            scope_path: scope.to_string(),
            issued_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            expires_at: Utc.timestamp_opt(1_700_000_300, 0).unwrap(),
            nonce: "c29tZS1yYW5kb20tbm9uY2U".to_string(),
        }
    }

    #[test]
    fn test_canonical_string_is_deterministic() {
        let req = request("products/123");
        let first = req.canonical_string().unwrap();
        let second = req.canonical_string().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_canonical_string_exact_form() {
        let req = request("products/123");
        assert_eq!(
            req.canonical_string().unwrap(),
            "action=upload-resource&expires_at=1700000300&issued_at=1700000000\
             &nonce=c29tZS1yYW5kb20tbm9uY2U&scope_path=products%2F123"
        );
    }

    #[test]
    fn test_canonical_string_has_no_whitespace() {
        let req = request("products/special offer");
        let s = req.canonical_string().unwrap();
        assert!(!s.contains(' '));
        assert!(s.contains("special%20offer"));
    }

    #[test]
    fn test_distinct_requests_encode_distinctly() {
        let a = request("products/123");
        let mut b = request("products/123");
        b.nonce.push('x');
        assert_ne!(a.canonical_string().unwrap(), b.canonical_string().unwrap());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let req = request("products/../secrets");
        assert!(matches!(
            req.canonical_string(),
            Err(CapabilityError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rejects_backslash_and_absolute_paths() {
        assert!(request("products\\123").canonical_string().is_err());
        assert!(request("/etc/passwd").canonical_string().is_err());
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(request("products/\u{1}23").canonical_string().is_err());

        let mut req = request("products/123");
        req.nonce = "abc\ndef".to_string();
        assert!(req.canonical_string().is_err());
    }

    #[test]
    fn test_rejects_empty_scope_for_upload() {
        let req = request("");
        assert!(matches!(
            req.canonical_string(),
            Err(CapabilityError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_scope_allowed_for_push() {
        let mut req = request("");
        req.action = Action::SendPush;
        assert!(req.canonical_string().is_ok());
    }

    #[test]
    fn test_rejects_inverted_window() {
        let mut req = request("products/123");
        req.expires_at = req.issued_at;
        assert!(matches!(
            req.canonical_string(),
            Err(CapabilityError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_action_wire_roundtrip() {
        assert_eq!(Action::parse("upload-resource"), Some(Action::UploadResource));
        assert_eq!(Action::parse("send-push"), Some(Action::SendPush));
        assert_eq!(Action::parse("delete-everything"), None);
    }
}
