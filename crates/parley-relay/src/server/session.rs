//! Per-connection session: lifecycle state and event dispatch.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_proto::{ClientEvent, UserId};

use crate::registry::{ClientConnection, ConnectionId, ConnectionRegistry, Registration};
use crate::router::{Delivery, MessageRouter};

/// Lifecycle of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted but no identity announced yet.
    Connected,
    /// Bound to a user in the registry.
    Announced(UserId),
    /// Terminal. Later events are ignored.
    Disconnected,
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Registered(Registration),
    Forwarded(Delivery),
    /// Frame could not be decoded and was dropped.
    Malformed,
    /// Event arrived after disconnect.
    Ignored,
}

/// Relay-side state for one client connection.
pub struct RelaySession {
    connection: Arc<ClientConnection>,
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    max_frame_bytes: usize,
}

impl RelaySession {
    /// Open a session for a freshly accepted connection. Touches no shared state.
    pub fn new(
        connection: Arc<ClientConnection>,
        router: Arc<MessageRouter>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            connection,
            state: SessionState::Connected,
            registry: Arc::clone(router.registry()),
            router,
            max_frame_bytes,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Decode a text frame and dispatch it.
    pub async fn handle_text(&mut self, text: &str) -> Outcome {
        match ClientEvent::decode(text, self.max_frame_bytes) {
            Ok(event) => {
                #[cfg(feature = "metrics")]
                parley_core::metrics::record_frame(event.name());
                self.dispatch(event).await
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                parley_core::metrics::record_frame("malformed");
                warn!(connection_id = %self.id(), error = %e, "Ignoring malformed frame");
                Outcome::Malformed
            }
        }
    }

    /// Apply one client event.
    pub async fn dispatch(&mut self, event: ClientEvent) -> Outcome {
        if self.state == SessionState::Disconnected {
            debug!(
                connection_id = %self.id(),
                event = event.name(),
                "Event after disconnect ignored"
            );
            return Outcome::Ignored;
        }

        match event {
            ClientEvent::Announce { user_id } => {
                if let SessionState::Announced(current) = &self.state {
                    if *current != user_id {
                        warn!(
                            connection_id = %self.id(),
                            user_id = %current,
                            new_user_id = %user_id,
                            "Connection announced a second identity"
                        );
                    }
                }
                let registration = self
                    .registry
                    .register(user_id.clone(), Arc::clone(&self.connection))
                    .await;
                self.state = SessionState::Announced(user_id);
                Outcome::Registered(registration)
            }
            ClientEvent::Send {
                recipient_id,
                payload,
            } => {
                let delivery = self.router.forward(&recipient_id, &payload).await;
                debug!(
                    connection_id = %self.id(),
                    recipient_id = %recipient_id,
                    outcome = ?delivery,
                    "Send handled"
                );
                #[cfg(feature = "metrics")]
                parley_core::metrics::record_delivery(delivery.label());
                Outcome::Forwarded(delivery)
            }
        }
    }

    /// Tear down the session's presence. Safe to call more than once.
    pub async fn disconnect(&mut self) -> Option<UserId> {
        if self.state == SessionState::Disconnected {
            return None;
        }
        self.state = SessionState::Disconnected;
        self.registry.unregister(&self.connection.id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const LIMIT: usize = 64 * 1024;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        router: Arc<MessageRouter>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
            Self { registry, router }
        }

        fn connect(&self) -> (RelaySession, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel(16);
            let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
            (RelaySession::new(conn, Arc::clone(&self.router), LIMIT), rx)
        }

        async fn online(&self, user: &str) -> (RelaySession, mpsc::Receiver<String>) {
            let (mut session, rx) = self.connect();
            let frame = format!(r#"{{"type":"announce","userId":"{user}"}}"#);
            assert!(matches!(
                session.handle_text(&frame).await,
                Outcome::Registered(_)
            ));
            (session, rx)
        }
    }

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn send_frame(to: &str, payload: &str) -> String {
        format!(r#"{{"type":"send","recipientId":"{to}","payload":{payload}}}"#)
    }

    #[tokio::test]
    async fn connect_does_not_register() {
        let h = Harness::new();
        let (session, _rx) = h.connect();

        assert_eq!(session.state(), &SessionState::Connected);
        assert_eq!(h.registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn announce_registers_and_transitions() {
        let h = Harness::new();
        let (session, _rx) = h.online("alice").await;

        assert_eq!(session.state(), &SessionState::Announced(uid("alice")));
        assert_eq!(h.registry.lookup(&uid("alice")).await, Some(session.id()));
    }

    #[tokio::test]
    async fn reannounce_same_user_is_noop() {
        let h = Harness::new();
        let (mut session, _rx) = h.online("alice").await;

        let outcome = session
            .handle_text(r#"{"type":"announce","userId":"alice"}"#)
            .await;

        assert_eq!(outcome, Outcome::Registered(Registration::Unchanged));
        assert_eq!(h.registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn send_delivers_exact_payload_to_recipient_only() {
        let h = Harness::new();
        let (mut alice, mut alice_rx) = h.online("alice").await;
        let (bob, mut bob_rx) = h.online("bob").await;
        let (_carol, mut carol_rx) = h.online("carol").await;

        let payload = r#"{"id":"m1","chatId":"c1","userId":"alice","text":"hello"}"#;
        let outcome = alice.handle_text(&send_frame("bob", payload)).await;

        assert_eq!(outcome, Outcome::Forwarded(Delivery::Delivered(bob.id())));
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            format!(r#"{{"type":"deliver","payload":{payload}}}"#)
        );
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_offline_user_is_silent() {
        let h = Harness::new();
        let (mut alice, mut alice_rx) = h.online("alice").await;

        let outcome = alice.handle_text(&send_frame("carol", r#"{"text":"?"}"#)).await;

        assert_eq!(outcome, Outcome::Forwarded(Delivery::RecipientOffline));
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(alice.state(), &SessionState::Announced(uid("alice")));
    }

    #[tokio::test]
    async fn unannounced_connection_may_send() {
        let h = Harness::new();
        let (mut anon, _rx) = h.connect();
        let (bob, mut bob_rx) = h.online("bob").await;

        let outcome = anon.handle_text(&send_frame("bob", "{}")).await;

        assert_eq!(outcome, Outcome::Forwarded(Delivery::Delivered(bob.id())));
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_clears_presence() {
        let h = Harness::new();
        let (mut bob, _rx) = h.online("bob").await;

        assert_eq!(bob.disconnect().await, Some(uid("bob")));
        assert_eq!(bob.state(), &SessionState::Disconnected);
        assert!(!h.registry.is_online(&uid("bob")).await);
        assert_eq!(bob.disconnect().await, None);
    }

    #[tokio::test]
    async fn disconnect_before_announce_is_harmless() {
        let h = Harness::new();
        let (_bob, _bob_rx) = h.online("bob").await;
        let (mut anon, _rx) = h.connect();

        assert_eq!(anon.disconnect().await, None);
        assert_eq!(h.registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn events_after_disconnect_are_ignored() {
        let h = Harness::new();
        let (mut alice, _rx) = h.online("alice").await;
        let (_bob, mut bob_rx) = h.online("bob").await;
        alice.disconnect().await;

        let send = alice.handle_text(&send_frame("bob", "{}")).await;
        let announce = alice
            .handle_text(r#"{"type":"announce","userId":"alice"}"#)
            .await;

        assert_eq!(send, Outcome::Ignored);
        assert_eq!(announce, Outcome::Ignored);
        assert!(bob_rx.try_recv().is_err());
        assert!(!h.registry.is_online(&uid("alice")).await);
    }

    #[tokio::test]
    async fn old_connection_disconnect_keeps_reconnected_user_online() {
        let h = Harness::new();
        let (mut first, _rx1) = h.online("bob").await;
        let (second, _rx2) = h.online("bob").await;

        assert_eq!(first.disconnect().await, None);
        assert_eq!(h.registry.lookup(&uid("bob")).await, Some(second.id()));
    }

    #[tokio::test]
    async fn malformed_frames_leave_state_untouched() {
        let h = Harness::new();
        let (mut alice, _rx) = h.online("alice").await;

        for frame in [
            "garbage",
            r#"{"type":"send","payload":{}}"#,
            r#"{"type":"announce"}"#,
            r#"{"type":"wave"}"#,
        ] {
            assert_eq!(alice.handle_text(frame).await, Outcome::Malformed);
        }

        assert_eq!(alice.state(), &SessionState::Announced(uid("alice")));
        assert_eq!(h.registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn send_racing_recipient_disconnect_never_reaches_closed_connection() {
        let h = Harness::new();
        let (_alice, _alice_rx) = h.online("alice").await;

        for _ in 0..32 {
            let (mut bob, bob_rx) = h.online("bob").await;
            let (mut alice2, _rx) = h.connect();

            let sender = tokio::spawn(async move {
                alice2.handle_text(&send_frame("bob", r#"{"n":1}"#)).await
            });
            let leaver = tokio::spawn(async move {
                bob.disconnect().await;
                drop(bob_rx);
            });

            let outcome = sender.await.unwrap();
            leaver.await.unwrap();

            assert!(
                matches!(
                    outcome,
                    Outcome::Forwarded(
                        Delivery::Delivered(_)
                            | Delivery::RecipientOffline
                            | Delivery::ConnectionClosed(_)
                    )
                ),
                "unexpected outcome: {outcome:?}"
            );
            assert!(!h.registry.is_online(&uid("bob")).await);
        }
    }
}
