//! Subscriber setup: stderr logging plus optional OTLP span export

use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;
use crate::error::ObservabilityError;

/// Filter used when neither the config nor `RUST_LOG` names one.
pub const DEFAULT_FILTER: &str = "warn";

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    match &config.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

fn resource(config: &ObservabilityConfig) -> Resource {
    let mut attributes = vec![KeyValue::new("service.name", config.service_name.clone())];
    if let Some(version) = &config.service_version {
        attributes.push(KeyValue::new("service.version", version.clone()));
    }
    attributes.extend(
        config
            .resource_attributes
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
    );
    Resource::builder().with_attributes(attributes).build()
}

/// Install the global subscriber
///
/// Fails if the configuration is invalid or a global subscriber is
/// already installed. An OTLP exporter that cannot be built is not fatal;
/// logging still comes up and the failure is logged once it does.
pub fn init(config: ObservabilityConfig) -> Result<(), ObservabilityError> {
    config.validate()?;

    // Stdout belongs to command output.
    let fmt_layer = config.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .with_target(false)
    });

    let export = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| (endpoint, build_tracer(&config, endpoint)));

    let otel_layer = match &export {
        Some((_, Ok(tracer))) => Some(OpenTelemetryLayer::new(tracer.clone())),
        _ => None,
    };

    Registry::default()
        .with(env_filter(&config))
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| ObservabilityError::InitFailed(e.to_string()))?;

    match export {
        Some((endpoint, Ok(_))) => {
            tracing::info!(service = %config.service_name, endpoint, "exporting spans over OTLP")
        }
        Some((endpoint, Err(e))) => {
            tracing::warn!(endpoint, error = %e, "OTLP export unavailable, logging only")
        }
        None => tracing::debug!(service = %config.service_name, "logging initialized"),
    }
    Ok(())
}

/// Builds the batched OTLP exporter, registers its provider globally and
/// keeps it for [`shutdown`].
fn build_tracer(config: &ObservabilityConfig, endpoint: &str) -> Result<SdkTracer, ObservabilityError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.to_string())
        .build()
        .map_err(|e| ObservabilityError::InitFailed(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource(config))
        .build();
    let tracer = provider.tracer(config.service_name.clone());

    global::set_tracer_provider(provider.clone());
    let _ = TRACER_PROVIDER.set(provider);
    Ok(tracer)
}

/// Flush and stop span export. Call once before the process exits.
pub fn shutdown() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    match provider.shutdown() {
        Ok(()) => tracing::debug!("span export stopped"),
        Err(e) => tracing::warn!(error = %e, "span export shutdown failed"),
    }
}

/// [`init`] with [`ObservabilityConfig::from_env`].
pub fn init_from_env() -> Result<(), ObservabilityError> {
    init(ObservabilityConfig::from_env())
}
