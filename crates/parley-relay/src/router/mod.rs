//! Best-effort message forwarding to online recipients.

mod forwarder;

pub use forwarder::{Delivery, MessageRouter};
