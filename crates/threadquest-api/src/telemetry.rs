//! Tracing subscriber and optional OpenTelemetry export.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::AppError;

const SERVICE_NAME: &str = "threadquest";

/// Keeps the span exporter alive; flush it with [`Telemetry::shutdown`].
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Installs a JSON `fmt` subscriber filtered by `RUST_LOG` (default
    /// `info`). When `otlp_endpoint` is set, spans are also exported over
    /// OTLP/gRPC.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Telemetry` if the exporter cannot be built or a
    /// global subscriber is already installed.
    pub fn init(otlp_endpoint: Option<&str>) -> Result<Self, AppError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let provider = match otlp_endpoint {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .build()
                    .map_err(|e| AppError::Telemetry(e.to_string()))?;
                Some(
                    SdkTracerProvider::builder()
                        .with_batch_exporter(exporter)
                        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                        .build(),
                )
            }
            None => None,
        };

        let otel_layer = provider
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(SERVICE_NAME)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(otel_layer)
            .try_init()
            .map_err(|e| AppError::Telemetry(e.to_string()))?;

        Ok(Self { provider })
    }

    /// Flushes pending spans.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
    }
}
