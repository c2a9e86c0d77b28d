//! Tracing subscriber setup for the noetic reasoning engine.
//!
//! Every phase of the cycle pipeline emits spans and events through the
//! `tracing` facade; this crate owns turning those into readable output
//! (and, optionally, exported OpenTelemetry spans) at process start.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Output format for the local `fmt` layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the global `tracing` subscriber.
///
/// `RUST_LOG` (or `NOETIC_LOG`, checked first) controls the filter; it
/// defaults to `info` when neither is set. Call this once, near the top of
/// `main`.
pub fn init_tracing(format: LogFormat) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_env("NOETIC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = Registry::default().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| InitError(e.to_string())),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .map_err(|e| InitError(e.to_string())),
    }
}

/// Error returned when the global subscriber has already been installed.
#[derive(Debug, thiserror::Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct InitError(String);

#[cfg(feature = "otlp")]
pub mod otlp {
    //! Optional OTLP span exporter, wired in addition to the local `fmt`
    //! layer rather than instead of it.
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter, Registry};

    use super::InitError;

    /// Initialize tracing with both a local `fmt` layer and an OTLP span
    /// exporter pointed at `endpoint` (e.g. `http://localhost:4317`).
    pub fn init_tracing_with_otlp(endpoint: &str) -> Result<(), InitError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| InitError(e.to_string()))?;

        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .build();
        let tracer = provider.tracer("noetic");

        let filter = EnvFilter::try_from_env("NOETIC_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        Registry::default()
            .with(filter)
            .with(fmt::layer())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|e| InitError(e.to_string()))
    }
}

#[cfg(feature = "stdout")]
pub mod stdout {
    //! Optional stdout span exporter, useful for local debugging of the
    //! cycle pipeline's span tree without a collector running.
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter, Registry};

    use super::InitError;

    pub fn init_tracing_with_stdout_spans() -> Result<(), InitError> {
        let exporter = opentelemetry_stdout::SpanExporter::default();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_simple_exporter(exporter)
            .build();
        let tracer = provider.tracer("noetic");

        let filter = EnvFilter::try_from_env("NOETIC_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        Registry::default()
            .with(filter)
            .with(fmt::layer())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|e| InitError(e.to_string()))
    }
}
