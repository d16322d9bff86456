//! Errors raised while decoding client frames.

use thiserror::Error;

/// A client frame that could not be turned into a [`crate::ClientEvent`].
///
/// The relay treats every variant the same way: the frame is logged and
/// dropped, and the connection stays open.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame exceeded the configured size limit.
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Frame was not valid JSON or had mistyped fields.
    #[error("Invalid JSON frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The `type` tag named an event the relay does not handle.
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    /// A field required by the event type was absent or null.
    #[error("Missing field `{field}` for `{event}` event")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    /// A user id was empty.
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
}
