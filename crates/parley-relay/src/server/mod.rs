//! HTTP/WebSocket server for the Parley relay.

pub mod health;
pub mod routes;
pub mod session;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use parley_core::RelayConfig;

use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;

pub use routes::build_router;
pub use session::{Outcome, RelaySession, SessionState};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Fresh state with an empty registry. All users start offline.
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
        Self {
            registry,
            router,
            config: Arc::new(config),
        }
    }
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Relay listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolve once `signal` fires.
///
/// If the signal listener cannot be installed the error is logged and the
/// future never resolves, so the relay keeps serving instead of exiting.
pub async fn shutdown_signal(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_follows_the_signal() {
        let fired = tokio::time::timeout(
            Duration::from_secs(1),
            shutdown_signal(std::future::ready(Ok(()))),
        )
        .await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn failed_signal_listener_does_not_stop_the_relay() {
        let failed = std::future::ready(Err(std::io::Error::other("no signal support")));
        let fired =
            tokio::time::timeout(Duration::from_millis(100), shutdown_signal(failed)).await;
        assert!(fired.is_err());
    }
}
