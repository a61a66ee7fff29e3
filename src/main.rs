//! Capgate CLI - issue, verify, and deliver scoped capabilities.
//!
//! This is the main binary entry point. See the `capgate` library for
//! the core functionality.

use anyhow::Result;
use capgate::{commands, Config};
use clap::{Parser, Subcommand};

use capgate::constants::DEFAULT_CAPABILITY_TTL;

#[derive(Parser)]
#[command(name = "capgate", version, about = "Capability-scoped request signing and web push delivery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the process-wide VAPID keypair.
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },
    /// Issue a signed capability and print its query string.
    Issue {
        /// Action to authorize: upload-resource or send-push.
        #[arg(long)]
        action: String,
        /// Scope the action is confined to (e.g., products/123).
        #[arg(long)]
        scope_path: String,
        /// Validity window in seconds.
        #[arg(long, default_value_t = DEFAULT_CAPABILITY_TTL.as_secs())]
        ttl: u64,
    },
    /// Verify a signed query string and print the grant.
    Redeem {
        /// The full query string produced by `issue`.
        query: String,
    },
    /// Send a test push message to one subscription.
    Send {
        /// Push service endpoint URL from the browser subscription.
        #[arg(long)]
        endpoint: String,
        /// Browser's P-256 ECDH public key (base64url).
        #[arg(long)]
        p256dh: String,
        /// Shared auth secret (base64url).
        #[arg(long)]
        auth: String,
        /// Plaintext payload to encrypt and deliver.
        #[arg(long)]
        payload: String,
        /// Seconds the push service may hold the message.
        #[arg(long, default_value_t = capgate::constants::DEFAULT_PUSH_TTL_SECS)]
        ttl: u32,
        /// Urgency header: very-low, low, normal, high.
        #[arg(long, default_value = "normal")]
        urgency: String,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a fresh keypair and print setup instructions.
    Generate,
    /// Print the configured public key.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Keys { action } => match action {
            KeysCommand::Generate => commands::keys::generate(),
            KeysCommand::Show => {
                let config = Config::from_env()?;
                commands::keys::show(&config)
            }
        },
        Command::Issue {
            action,
            scope_path,
            ttl,
        } => {
            let config = Config::from_env()?;
            commands::capability::issue(&config, &action, &scope_path, ttl)
        }
        Command::Redeem { query } => {
            let config = Config::from_env()?;
            commands::capability::redeem(&config, &query)
        }
        Command::Send {
            endpoint,
            p256dh,
            auth,
            payload,
            ttl,
            urgency,
        } => {
            let config = Config::from_env()?;
            commands::send::run(&config, &endpoint, &p256dh, &auth, &payload, ttl, &urgency).await
        }
    }
}
