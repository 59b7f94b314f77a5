//! Shared domain types for the kiosk key-card issuer.
//!
//! This crate holds the vocabulary every other `keycard` crate speaks: chip
//! families, card identities, encoding payloads, sector keys, and the status
//! and driver codes reported by K720-class dispensers and M100A/M600 encoders.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
