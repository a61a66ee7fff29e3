//! Test push delivery subcommand.

use anyhow::Result;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::push::{PushClient, PushMessage, SubscriptionRegistry, Urgency};
use crate::Config;

/// Deliver one message to a single subscription supplied on the command
/// line, exactly as the browser's `PushSubscription` object reports it.
pub async fn run(
    config: &Config,
    endpoint: &str,
    p256dh: &str,
    auth: &str,
    payload: &str,
    ttl_secs: u32,
    urgency: &str,
) -> Result<()> {
    let urgency = parse_urgency(urgency)?;

    let client = PushClient::from_config(config)?;
    anyhow::ensure!(
        client.is_configured(),
        "VAPID keys not configured; run `capgate keys generate` and export the environment variables"
    );

    let registry = Arc::new(RwLock::new(SubscriptionRegistry::new(
        config.stale_threshold(),
    )));
    let user = "cli";
    {
        let mut reg = registry.write().unwrap_or_else(|e| e.into_inner());
        reg.register(endpoint, p256dh, auth, user);
    }

    let message = PushMessage::new(payload.as_bytes().to_vec())
        .with_ttl(ttl_secs)
        .with_urgency(urgency);

    let report = client
        .send_to_user(&registry, user, &message, &CancellationToken::new())
        .await;

    anyhow::ensure!(
        report.delivered == 1,
        "Delivery failed ({} revoked, {} failed)",
        report.revoked,
        report.failed
    );
    println!("Delivered.");
    Ok(())
}

fn parse_urgency(raw: &str) -> Result<Urgency> {
    match raw {
        "very-low" => Ok(Urgency::VeryLow),
        "low" => Ok(Urgency::Low),
        "normal" => Ok(Urgency::Normal),
        "high" => Ok(Urgency::High),
        other => anyhow::bail!("unknown urgency '{other}' (very-low|low|normal|high)"),
    }
}
