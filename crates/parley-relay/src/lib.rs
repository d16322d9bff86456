//! Parley Relay Server Library
//!
//! Core functionality for the Parley relay:
//! - Connection registry tracking which user is online on which connection
//! - Message router forwarding payloads to a recipient's live connection
//! - WebSocket transport with a per-connection session state machine

pub mod registry;
pub mod router;
pub mod server;
