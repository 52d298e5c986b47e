//! Logging and trace export setup.
//!
//! Call [`init_tracing`] once at process start and keep the returned guard
//! alive until exit.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives (default `info`). |
//! | `ARMCORE_LOG_FORMAT=json` | Newline-delimited JSON instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Export spans over OTLP/HTTP to this collector. |
//!
//! ```rust,no_run
//! let _guard = armcore_runtime::telemetry::init_tracing("armcore");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects [`LogFormat::Json`]; anything else is
    /// compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var("ARMCORE_LOG_FORMAT").ok().as_deref())
    }
}

/// Install the global subscriber.  Spans created by `#[instrument]` on the
/// controller are exported when an OTLP endpoint is configured.
///
/// Calling this twice is harmless: the second installation is skipped.
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name, std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok());
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("armcore")));

    let registry = tracing_subscriber::registry().with(filter).with(otel);
    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };
    if let Err(e) = installed {
        eprintln!("[armcore] tracing already initialised: {e}");
    }

    TelemetryGuard(provider)
}

/// Flushes and shuts down the span exporter on drop.
pub struct TelemetryGuard(Option<SdkTracerProvider>);

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[armcore] span exporter shutdown failed: {e}");
        }
    }
}

fn build_provider(service_name: &str, endpoint: Option<String>) -> Option<SdkTracerProvider> {
    let endpoint = endpoint.filter(|e| !e.trim().is_empty())?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[armcore] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple (synchronous) export: the CLI installs tracing before its
    // runtime exists, so a batch exporter could not spawn its worker.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_exporter() {
        assert!(build_provider("armcore-test", None).is_none());
        assert!(build_provider("armcore-test", Some("  ".into())).is_none());
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(None), LogFormat::Compact);
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        let guard = TelemetryGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
