//! Capability issue/redeem subcommands.
//!
//! `issue` prints the signed-URL query string a client would append to
//! its request to the third-party resource. `redeem` verifies one, which
//! doubles as a diagnostic for canonical-encoding mismatches with the
//! third party: if a signature the provider rejects also fails here, the
//! token is bad; if it verifies here, the provider's encoding diverges.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::canonical::Action;
use crate::capability::{CapabilityIssuer, SignedCapability};
use crate::replay::ReplayCache;
use crate::Config;

/// Issue a capability and print its signed query string.
pub fn issue(config: &Config, action: &str, scope_path: &str, ttl_secs: u64) -> Result<()> {
    let action = Action::parse(action)
        .with_context(|| format!("unknown action '{action}' (expected upload-resource or send-push)"))?;

    let issuer = CapabilityIssuer::from_config(config, Arc::new(ReplayCache::new()));
    let capability = issuer
        .issue(action, scope_path, Duration::from_secs(ttl_secs))
        .context("Failed to issue capability")?;

    println!("{}", capability.to_query_string()?);
    Ok(())
}

/// Verify a signed query string and print the resulting grant.
///
/// Runs against a fresh replay cache; replay protection only applies
/// within one process, so this checks signature and freshness.
pub fn redeem(config: &Config, query: &str) -> Result<()> {
    let issuer = CapabilityIssuer::from_config(config, Arc::new(ReplayCache::new()));
    let capability = SignedCapability::from_query_str(query)
        .map_err(|e| anyhow::anyhow!("Could not parse signed query: {e}"))?;

    match issuer.redeem(&capability) {
        Ok(grant) => {
            println!("Valid capability:");
            println!("  action:     {}", grant.action);
            println!("  scope_path: {}", grant.scope_path);
            println!("  expires_at: {}", grant.expires_at.to_rfc3339());
            Ok(())
        }
        Err(err) => {
            // Specific reason goes to the log; stdout stays undifferentiated
            log::warn!("[Capability] CLI redemption refused: {err}");
            anyhow::bail!("{}", err.public_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_rejects_unknown_action() {
        let config = Config::default();
        assert!(issue(&config, "delete-everything", "p", 60).is_err());
    }

    #[test]
    fn test_issue_without_secret_reports_not_configured() {
        let config = Config::default();
        let err = issue(&config, "upload-resource", "products/1", 60).unwrap_err();
        assert!(err.to_string().contains("Failed to issue capability"));
    }
}
