//! WebSocket transport for relay connections.
//!
//! Each accepted socket runs as a small actor:
//! - Writer task: owns the sink, drains the outbound frame queue and control
//!   messages (pings, pongs, close)
//! - Keepalive task: pings periodically and gives up when the pong for the
//!   outstanding ping does not come back in time
//! - Reader loop: decodes text frames and feeds them to the [`RelaySession`]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use parley_core::RelayConfig;

use crate::registry::{ClientConnection, ConnectionId};
use crate::server::AppState;
use crate::server::session::RelaySession;

/// Time allowed for queued frames (and a close frame) to flush on teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Pings, pongs and close frames waiting for the writer.
const CONTROL_QUEUE: usize = 16;

/// Pong payloads waiting for the keepalive task.
const PONG_QUEUE: usize = 4;

/// Messages above `max_payload_bytes` times this are refused by the
/// transport and close the connection. Smaller oversized frames are
/// decoded and dropped.
const WIRE_LIMIT_FACTOR: usize = 4;

/// Whether a browser `Origin` may open a relay connection.
pub fn is_origin_allowed(config: &RelayConfig, origin: &str) -> bool {
    config.allows_any_origin() || config.allowed_origins.iter().any(|o| o == origin)
}

/// Largest WebSocket message or frame the transport will buffer.
pub const fn wire_limit(config: &RelayConfig) -> usize {
    config.max_payload_bytes.saturating_mul(WIRE_LIMIT_FACTOR)
}

/// GET /ws
///
/// Rejects disallowed origins with 403 before looking at the upgrade itself.
/// Requests without an `Origin` header come from non-browser clients and are
/// accepted.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|origin| is_origin_allowed(&state.config, origin));
        if !allowed {
            warn!(origin = ?origin, "Rejecting relay connection from disallowed origin");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }

    match ws {
        Ok(ws) => {
            let limit = wire_limit(&state.config);
            ws.max_message_size(limit)
                .max_frame_size(limit)
                .on_upgrade(move |socket| run_connection(socket, state))
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Drive one accepted socket until it closes, then drop its presence.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<String>(state.config.outbound_queue);
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<Message>(CONTROL_QUEUE);

    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), frame_tx));
    let mut session = RelaySession::new(
        connection,
        Arc::clone(&state.router),
        state.config.max_payload_bytes,
    );
    let connection_id = session.id();
    info!(connection_id = %connection_id, "Connection opened");

    let mut writer = tokio::spawn(writer_task(ws_sender, frame_rx, ctrl_rx));

    let (pong_tx, pong_rx) = mpsc::channel::<Bytes>(PONG_QUEUE);
    let mut keepalive = tokio::spawn(keepalive_task(
        ctrl_tx.clone(),
        pong_rx,
        state.config.ping_interval(),
        state.config.pong_timeout(),
    ));

    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = &mut keepalive => {
                info!(connection_id = %connection_id, "Keepalive ended, closing connection");
                break;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                session.handle_text(text.as_str()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                debug!(
                    connection_id = %connection_id,
                    len = data.len(),
                    "Ignoring binary frame"
                );
            }
            Some(Ok(Message::Ping(data))) => {
                if ctrl_tx.try_send(Message::Pong(data)).is_err() {
                    debug!(connection_id = %connection_id, "Control queue full, dropping pong");
                }
            }
            Some(Ok(Message::Pong(data))) => {
                // A full queue means the keepalive is not waiting; the pong is stale.
                let _ = pong_tx.try_send(data);
            }
            Some(Ok(Message::Close(frame))) => {
                info!(connection_id = %connection_id, reason = ?frame, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                debug!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Presence goes first so no new deliveries are routed here.
    session.disconnect().await;
    keepalive.abort();
    drop(session);
    drop(ctrl_tx);

    if timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(connection_id = %connection_id, "Connection closed");
}

/// Forward queued frames and control messages to the socket sink.
///
/// Ends when the sink fails or every sender is gone.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<String>,
    mut control: mpsc::Receiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            Some(ctrl) = control.recv() => ctrl,
            Some(frame) = frames.recv() => Message::Text(frame.into()),
            else => break,
        };
        let closing = matches!(msg, Message::Close(_));
        if sink.send(msg).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Ping every `every`; stop when the matching pong is not back within `wait`.
///
/// Each ping carries a fresh payload. Pongs queued before the ping went out
/// are discarded and pongs with another payload are ignored.
async fn keepalive_task(
    ctrl_tx: mpsc::Sender<Message>,
    mut pong_rx: mpsc::Receiver<Bytes>,
    every: Duration,
    wait: Duration,
) {
    let mut ticker = interval(every);
    // Skip the first immediate tick
    ticker.tick().await;

    for seq in 0u64.. {
        ticker.tick().await;

        while pong_rx.try_recv().is_ok() {}

        let expected = Bytes::from(format!("parley-{seq}"));
        match timeout(wait, ctrl_tx.send(Message::Ping(expected.clone()))).await {
            Ok(Ok(())) => {}
            // Writer is gone
            Ok(Err(_)) => return,
            Err(_) => {
                warn!("Control queue stalled, closing connection");
                return;
            }
        }

        let answered = timeout(wait, async {
            while let Some(pong) = pong_rx.recv().await {
                if pong == expected {
                    return true;
                }
            }
            false
        })
        .await;

        match answered {
            Ok(true) => {}
            // Reader is gone
            Ok(false) => return,
            Err(_) => {
                warn!("Pong timeout, closing connection");
                let _ = ctrl_tx.try_send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "Pong timeout".into(),
                })));
                return;
            }
        }
    }
}
