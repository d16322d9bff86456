//! Shared tracing/logging initialisation.
//!
//! Sets up `tracing_subscriber` with an env-filter, optional JSON output and,
//! when the `metrics` feature is enabled, an `OpenTelemetry` export layer.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
pub use crate::metrics::MetricsGuard as TelemetryGuard;

/// Placeholder guard when the `metrics` feature is off.
#[cfg(not(feature = "metrics"))]
#[derive(Debug)]
pub struct TelemetryGuard;

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"parley_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(fmt::layer())
            .init();
    }
}

/// Initialise tracing and, if an endpoint is given, the OTLP pipeline.
///
/// The returned guard must be held for the process lifetime. A pipeline that
/// fails to build is logged and skipped rather than aborting startup.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<TelemetryGuard> {
    let (guard, failure) = match metrics_endpoint.map(crate::metrics::init_metrics) {
        Some(Ok(guard)) => (Some(guard), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let otel_layer = guard
        .as_ref()
        .map(|g| tracing_opentelemetry::layer().with_tracer(g.tracer()));

    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(otel_layer)
        .with(log_json.then(|| fmt::layer().json()))
        .with((!log_json).then(fmt::layer))
        .init();

    if let Some(e) = failure {
        tracing::warn!(error = %e, "OpenTelemetry pipeline disabled");
    }
    guard
}

/// Initialise tracing; without the `metrics` feature the endpoint is ignored.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<TelemetryGuard> {
    init_tracing(default_filter, log_json);
    if metrics_endpoint.is_some() {
        tracing::warn!("Metrics endpoint set but the `metrics` feature is not compiled in");
    }
    None
}
