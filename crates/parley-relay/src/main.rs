//! Parley Relay Server
//!
//! WebSocket relay that tracks online users and forwards chat payloads to
//! the recipient's live connection.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use parley_core::config::{RelayConfig, load_config, split_origins};
use parley_relay::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "parley-relay")]
#[command(version, about = "Parley relay server - presence tracking and message relay")]
struct Args {
    /// Path to a JSON config file layered over the global one.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Origin allowed to open relay connections (repeatable, or comma-separated).
    /// Use `*` to allow any origin.
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Largest accepted client frame in bytes.
    #[arg(long)]
    max_payload_bytes: Option<usize>,

    /// Frames buffered per connection before deliveries are dropped.
    #[arg(long)]
    outbound_queue: Option<usize>,

    /// Log level for the relay (overridden by `RUST_LOG`).
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PARLEY_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "PARLEY_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    /// Apply CLI flags over the file/env layers.
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if !self.allowed_origins.is_empty() {
            config.allowed_origins = self
                .allowed_origins
                .iter()
                .flat_map(|o| split_origins(o))
                .collect();
        }
        if let Some(n) = self.max_payload_bytes {
            config.max_payload_bytes = n;
        }
        if let Some(n) = self.outbound_queue {
            config.outbound_queue = n;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!("parley_relay={}", config.log_level);
    let telemetry = parley_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.addr,
        allowed_origins = ?config.allowed_origins,
        "Starting parley-relay"
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    let state = AppState::new(config);

    server::serve(
        listener,
        state,
        server::shutdown_signal(tokio::signal::ctrl_c()),
    )
    .await?;

    #[cfg(feature = "metrics")]
    if let Some(guard) = telemetry {
        if let Err(e) = guard.shutdown() {
            tracing::warn!(error = %e, "OpenTelemetry shutdown failed");
        }
    }
    #[cfg(not(feature = "metrics"))]
    drop(telemetry);

    info!("Relay stopped");
    Ok(())
}
