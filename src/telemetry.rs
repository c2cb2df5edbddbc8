use crate::error::SimError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps the exporter alive; spans still buffered are flushed on drop.
pub struct TelemetryGuard {
    #[cfg(feature = "distributed")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "distributed")]
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[telemetry] tracer shutdown failed: {}", e);
            }
        }
    }
}

/// Installs the global subscriber: `RUST_LOG`-filtered fmt output, plus OTLP
/// export when built with `distributed` and `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init_tracing(service: &str) -> Result<TelemetryGuard, SimError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "distributed")]
    {
        use opentelemetry::trace::TracerProvider;

        let provider = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            Ok(endpoint) if !endpoint.is_empty() => Some(otlp_provider(service, &endpoint)?),
            _ => None,
        };
        let otel_layer = provider
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(service.to_string())));
        tracing_subscriber::registry()
            .with(filter)
            .with(otel_layer)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| SimError::Other(format!("failed to install subscriber: {}", e)))?;
        Ok(TelemetryGuard { provider })
    }

    #[cfg(not(feature = "distributed"))]
    {
        let _ = service;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| SimError::Other(format!("failed to install subscriber: {}", e)))?;
        Ok(TelemetryGuard {})
    }
}

#[cfg(feature = "distributed")]
fn otlp_provider(
    service: &str,
    endpoint: &str,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, SimError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{Protocol, WithExportConfig};
    use opentelemetry_sdk::{Resource, trace as sdktrace};

    let endpoint = traces_endpoint(endpoint);
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| SimError::Other(format!("failed to build OTLP exporter: {}", e)))?;
    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", service.to_string())])
        .build();
    Ok(sdktrace::SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// `http://jaeger:4318` -> `http://jaeger:4318/v1/traces`
pub fn traces_endpoint(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/v1/traces") {
        base.to_string()
    } else {
        format!("{}/v1/traces", base)
    }
}
