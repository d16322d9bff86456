//! Presence registry for live client connections.

mod connection;

pub use connection::{ClientConnection, ConnectionId, ConnectionRegistry, Registration};
