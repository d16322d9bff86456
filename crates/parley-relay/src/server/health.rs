//! Liveness endpoint for load balancers and uptime checks.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Users with a live connection right now.
    pub online: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // If this handler runs, the relay is alive and accepting connections.
    Json(HealthResponse {
        status: "serving",
        online: state.registry.online_count().await,
    })
}
