//! Tracing subscriber bootstrap shared by the `discoverer` and
//! `discoverer-cli` binaries: a `fmt` layer (text or JSON) plus an optional
//! OTLP exporter layer, gated on whether an endpoint was configured.
//!
//! This mirrors the split the rest of the workspace uses: `utils::logging`
//! owns the panic hook, this crate owns everything that talks to an
//! exporter, so a binary that doesn't need tracing spans (like a one-shot
//! CLI) can skip this dependency entirely.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Sampler;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub json: bool,
    pub otlp_endpoint: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            json: false,
            otlp_endpoint: None,
        }
    }
}

/// Holds the OpenTelemetry tracer provider alive for the process lifetime.
/// Dropping it flushes buffered spans and shuts the exporter down, so
/// binaries keep the returned guard bound to a `let` in `main` rather than
/// discarding it.
pub struct TracingGuard {
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {err}");
            }
        }
    }
}

/// Installs a global `tracing` subscriber for `service_name`. Must be called
/// once, before any other `tracing` call, and its return value kept alive
/// for the duration of the process.
pub fn init_tracing(service_name: &str, settings: &LoggingSettings) -> anyhow::Result<TracingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (otel_layer, provider) = match &settings.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint.clone())
                .build()?;
            let provider = opentelemetry_sdk::trace::TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(opentelemetry_sdk::Resource::new(vec![KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    service_name.to_owned(),
                )]))
                .build();
            let tracer = provider.tracer(service_name.to_owned());
            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(provider),
            )
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(TracingGuard { provider })
}
