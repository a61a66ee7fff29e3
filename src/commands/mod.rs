//! CLI subcommand implementations for capgate.
//!
//! Thin wrappers over the library, organized by domain:
//!
//! - [`keys`] - VAPID keypair generation and inspection
//! - [`capability`] - issue and redeem signed capabilities
//! - [`send`] - deliver a test push message to one subscription

pub mod capability;
pub mod keys;
pub mod send;
