//! Tenant identifiers, redacted secrets, and the configuration records vendor clients are built
//! from.

pub mod config;
pub mod id;
pub mod secret;

pub use config::*;
pub use id::*;
pub use secret::*;
