//! Parley wire protocol
//!
//! JSON text frames exchanged between chat clients and the relay:
//! - [`ClientEvent`] for `announce` and `send` frames from clients
//! - [`ServerEvent`] for `deliver` frames pushed to recipients
//! - [`UserId`] for the externally assigned user identity
//!
//! Payloads are carried as raw JSON and never reinterpreted by the relay.

pub mod error;
pub mod events;
pub mod user;

pub use error::DecodeError;
pub use events::{ClientEvent, ServerEvent};
pub use user::UserId;

// Re-export RawValue for downstream crates that build or inspect payloads
pub use serde_json::value::RawValue;
