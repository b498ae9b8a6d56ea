//! Distributed-tracing wiring (spec §6 observability surface): an OTLP
//! exporter plus a stdout exporter for local inspection, both reporting
//! spans for the `beacon_server` service.

use std::collections::HashMap;

use opentelemetry::propagation::Extractor;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter as OtlpExporter, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Sampler;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use opentelemetry_stdout::SpanExporter as StdoutExporter;

use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt};

use crate::util::config::Observability;

const SERVICE_NAME: &str = "beacon_server";

/// Adapts a header map so OpenTelemetry can extract a propagated trace context.
pub struct HeaderExtractor<'a>(pub &'a HashMap<String, String>);

impl Extractor for HeaderExtractor<'_> {
	fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(|s| s.as_str())
	}

	fn keys(&self) -> Vec<&str> {
		self.0.keys().map(|k| k.as_str()).collect()
	}
}

/// Extracts an inbound trace context from request headers, for span linkage
/// across a client → Beacon request.
pub fn extract_context(headers: &HashMap<String, String>) -> opentelemetry::Context {
	let propagator = TraceContextPropagator::new();
	propagator.extract(&HeaderExtractor(headers))
}

/// Initializes the tracing subscriber with OTLP and stdout exporters, sized
/// by the configured sample rate.
pub fn configure_tracer(observability: &Observability) -> Result<(), String> {
	let otlp_exporter = OtlpExporter::builder()
		.with_tonic()
		.with_endpoint(&observability.otlp_endpoint)
		.build()
		.map_err(|e| format!("Failed to create OTLP exporter: {}", e))?;
	let stdout_exporter = StdoutExporter::default();

	let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(observability.sample_rate)));

	let tracer_provider = SdkTracerProvider::builder()
		.with_sampler(sampler)
		.with_batch_exporter(otlp_exporter)
		.with_batch_exporter(stdout_exporter)
		.with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
		.build();

	let tracer = tracer_provider.tracer(SERVICE_NAME);

	tracing_subscriber::registry()
		.with(Targets::new().with_default(LevelFilter::WARN).with_target(SERVICE_NAME, LevelFilter::INFO))
		.with(fmt::layer().json())
		.with(OpenTelemetryLayer::new(tracer))
		.try_init()
		.map_err(|e| format!("Failed to install tracing subscriber: {}", e))
}
