//! VAPID key management subcommands.

use anyhow::Result;

use crate::config::Config;
use crate::push::VapidKeys;

/// Generate a fresh VAPID keypair and print it with setup instructions.
pub fn generate() -> Result<()> {
    let keys = VapidKeys::generate();

    println!("Generated VAPID keypair.");
    println!();
    println!("  Public key (applicationServerKey for browsers):");
    println!();
    println!("    {}", keys.public_key_base64url());
    println!();
    println!("  Configure the process environment:");
    println!();
    println!("    export CAPGATE_VAPID_PUBLIC_KEY={}", keys.public_key_base64url());
    println!("    export CAPGATE_VAPID_PRIVATE_KEY={}", keys.private_key_base64url());
    println!();
    println!("  Keep the private key out of shell history in production.");
    Ok(())
}

/// Print the configured public key, or how to configure one.
pub fn show(config: &Config) -> Result<()> {
    match config.vapid_public_key() {
        Some(public) => {
            // Validate the pair if the private half is present too
            if let Some(private) = config.vapid_private_key() {
                VapidKeys::from_base64url(public, private)?;
            }
            println!("{public}");
        }
        None => {
            println!("No VAPID keys configured. Run `capgate keys generate`.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prints_without_error() {
        assert!(generate().is_ok());
    }
}
