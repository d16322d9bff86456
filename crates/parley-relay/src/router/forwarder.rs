//! Message router that forwards payloads to a recipient's live connection.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use parley_proto::{RawValue, ServerEvent, UserId};

use crate::registry::{ConnectionId, ConnectionRegistry};

/// What happened to a forwarded message.
///
/// Every variant counts as success for the sender; the outcome only feeds
/// logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's connection.
    Delivered(ConnectionId),
    /// Recipient has no live connection. The message is dropped.
    RecipientOffline,
    /// The looked-up connection closed before the frame could be queued.
    ConnectionClosed(ConnectionId),
    /// The recipient is not draining its queue. The message is dropped.
    QueueFull(ConnectionId),
    /// The deliver frame could not be encoded.
    EncodeFailed,
}

impl Delivery {
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Stable outcome name for metric labels.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::RecipientOffline => "recipient_offline",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::QueueFull(_) => "queue_full",
            Self::EncodeFailed => "encode_failed",
        }
    }
}

/// Routes payloads to online recipients through the connection registry.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
}

impl MessageRouter {
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward `payload` to `recipient` if they are online.
    ///
    /// Single attempt, never blocks on the recipient: a full or closed queue
    /// drops the message.
    pub async fn forward(&self, recipient: &UserId, payload: &RawValue) -> Delivery {
        let Some(conn) = self.registry.get(recipient).await else {
            debug!(recipient_id = %recipient, "Recipient offline, dropping message");
            return Delivery::RecipientOffline;
        };

        let frame = match (ServerEvent::Deliver { payload }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(recipient_id = %recipient, error = %e, "Failed to encode deliver frame");
                return Delivery::EncodeFailed;
            }
        };

        match conn.try_send_frame(frame) {
            Ok(()) => {
                debug!(
                    recipient_id = %recipient,
                    connection_id = %conn.id,
                    bytes = payload.get().len(),
                    "Message forwarded"
                );
                Delivery::Delivered(conn.id)
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    recipient_id = %recipient,
                    connection_id = %conn.id,
                    "Recipient connection closed mid-forward, dropping message"
                );
                Delivery::ConnectionClosed(conn.id)
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    recipient_id = %recipient,
                    connection_id = %conn.id,
                    "Recipient queue full, dropping message"
                );
                Delivery::QueueFull(conn.id)
            }
        }
    }

    /// Get a reference to the connection registry.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
