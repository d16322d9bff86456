//! `OpenTelemetry` export pipeline and relay instruments.
//!
//! Only compiled with the `metrics` feature. [`init_metrics`] installs the
//! global tracer and meter providers; the `record_*` helpers write to the
//! global meter and are no-ops until a provider is installed.

use std::sync::OnceLock;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};

const SCOPE: &str = "parley-relay";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the installed providers alive. Call [`MetricsGuard::shutdown`]
/// before exit to flush; dropping does not.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Tracer for the `tracing-opentelemetry` bridge layer.
    pub fn tracer(&self) -> Tracer {
        self.tracer_provider.tracer(SCOPE)
    }

    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Export traces and metrics over OTLP/gRPC to `endpoint`
/// (e.g. `http://localhost:4317`).
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(spans)
        .build();

    let metrics = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metrics)
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

struct Instruments {
    frames: Counter<u64>,
    deliveries: Counter<u64>,
    online_users: Gauge<i64>,
}

static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

fn instruments() -> &'static Instruments {
    INSTRUMENTS.get_or_init(|| {
        let meter: Meter = global::meter(SCOPE);
        Instruments {
            frames: meter
                .u64_counter("parley.frames.received")
                .with_description("Client frames received, by decoded event")
                .with_unit("frame")
                .build(),
            deliveries: meter
                .u64_counter("parley.deliveries")
                .with_description("Forward attempts, by outcome")
                .with_unit("message")
                .build(),
            online_users: meter
                .i64_gauge("parley.users.online")
                .with_description("Users with a live relay connection")
                .with_unit("user")
                .build(),
        }
    })
}

/// Count one inbound frame. `event` is the event name or `"malformed"`.
pub fn record_frame(event: &'static str) {
    instruments()
        .frames
        .add(1, &[KeyValue::new("event", event)]);
}

/// Count one forward attempt with its outcome label.
pub fn record_delivery(outcome: &'static str) {
    instruments()
        .deliveries
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

pub fn record_online_users(count: usize) {
    instruments()
        .online_users
        .record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
}
