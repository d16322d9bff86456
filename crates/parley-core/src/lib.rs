//! `Parley` Core Library
//!
//! Shared functionality for `Parley` components:
//! - Layered relay configuration
//! - Tracing/logging initialisation
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;

pub use config::RelayConfig;
pub use error::{Error, Result};
