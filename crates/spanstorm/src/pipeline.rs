use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::config::{OtlpProtocol, TracingConfig};

/// Resource-level service name attached to every exported span.
const SERVICE_NAME: &str = "spanstorm";

/// Failure to construct a new exporter pipeline, e.g. an endpoint the
/// transport cannot use. Non-fatal: the spammer loop keeps its previous
/// pipeline, or stays armed without one.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
}

/// The live export handle: a batch tracer provider bound to a single
/// `(endpoint, protocol)` pair, plus the tracer spans are created from.
///
/// Exactly one pipeline is current at any time and it is owned exclusively
/// by the spammer loop. Rebuilding produces a new instance; the old one is
/// shut down after the swap, so spans queued behind it are flushed
/// best-effort and may be dropped. Zero-loss across a reconfiguration
/// boundary is explicitly not guaranteed.
pub struct ExporterPipeline {
    provider: SdkTracerProvider,
    tracer: BoxedTracer,
    endpoint: String,
    protocol: OtlpProtocol,
}

impl ExporterPipeline {
    /// Build a pipeline for the endpoint and protocol in `config`.
    pub fn build(config: &TracingConfig) -> Result<Self, BuildError> {
        let exporter = match config.protocol {
            OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(config.endpoint.as_str())
                .build()?,
            OtlpProtocol::HttpProtobuf => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(config.endpoint.as_str())
                .build()?,
        };

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .build();

        let pipeline = Self::from_provider(provider, config.endpoint.clone(), config.protocol);
        tracing::info!(
            endpoint = %pipeline.endpoint,
            protocol = %pipeline.protocol,
            "exporter pipeline built"
        );
        Ok(pipeline)
    }

    /// Wrap an already-built provider. Lets tests drive the engine against
    /// an in-memory exporter.
    pub(crate) fn from_provider(
        provider: SdkTracerProvider,
        endpoint: String,
        protocol: OtlpProtocol,
    ) -> Self {
        let tracer = BoxedTracer::new(Box::new(provider.tracer(SERVICE_NAME)));
        Self {
            provider,
            tracer,
            endpoint,
            protocol,
        }
    }

    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn protocol(&self) -> OtlpProtocol {
        self.protocol
    }

    /// Flush and shut the provider down. Best-effort: failures are reported
    /// as diagnostics only and spans still queued may be dropped.
    pub fn shutdown(self) {
        if let Err(err) = self.provider.shutdown() {
            tracing::warn!(error = %err, "exporter pipeline shutdown reported an error");
        }
    }
}
