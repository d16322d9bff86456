//! Client and server event frames.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::DecodeError;
use crate::user::UserId;

/// Event sent by a client over its relay connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// Bind a user identity to the sending connection.
    Announce { user_id: UserId },
    /// Forward `payload` to the recipient's live connection, if any.
    Send {
        recipient_id: UserId,
        payload: Box<RawValue>,
    },
}

/// Flat shape every client frame is parsed into before validation.
///
/// Internally tagged enums buffer their content, which `RawValue` cannot be
/// read from, so the tag is dispatched by hand.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default, alias = "receiverId")]
    recipient_id: Option<UserId>,
    #[serde(default, alias = "data")]
    payload: Option<Box<RawValue>>,
}

impl ClientEvent {
    /// Decode a text frame, rejecting frames longer than `max_len` bytes.
    ///
    /// `newUser`/`sendMessage` (with `receiverId`/`data`) are accepted as
    /// aliases of `announce`/`send` for clients written against the
    /// Socket.IO event names.
    pub fn decode(text: &str, max_len: usize) -> Result<Self, DecodeError> {
        if text.len() > max_len {
            return Err(DecodeError::FrameTooLarge {
                size: text.len(),
                limit: max_len,
            });
        }

        let frame: RawClientFrame = serde_json::from_str(text)?;
        match frame.kind.as_str() {
            "announce" | "newUser" => {
                let user_id = frame.user_id.ok_or(DecodeError::MissingField {
                    event: "announce",
                    field: "userId",
                })?;
                Ok(Self::Announce { user_id })
            }
            "send" | "sendMessage" => {
                let recipient_id = frame.recipient_id.ok_or(DecodeError::MissingField {
                    event: "send",
                    field: "recipientId",
                })?;
                let payload = frame.payload.ok_or(DecodeError::MissingField {
                    event: "send",
                    field: "payload",
                })?;
                Ok(Self::Send {
                    recipient_id,
                    payload,
                })
            }
            _ => Err(DecodeError::UnknownEvent(frame.kind)),
        }
    }

    /// Short event name for log fields.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Announce { .. } => "announce",
            Self::Send { .. } => "send",
        }
    }
}

/// Event pushed by the relay to a client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent<'a> {
    /// A payload forwarded verbatim from another user.
    Deliver { payload: &'a RawValue },
}

impl ServerEvent<'_> {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
