use crate::config::Config;
use crate::span::{SpanHandle, SpanRecord, SpanStatus};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_semantic_conventions::resource as semconv;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Destination for finished spans and forwarded errors.
pub trait TraceSink: Send + Sync {
	fn span_closed(&self, span: &SpanRecord);
	fn capture_exception(&self, span: &SpanHandle, err: &anyhow::Error);
}

/// Emits through the `tracing` pipeline. When an OTLP layer is installed the
/// events land on the exported span; otherwise they only reach stderr logs.
pub struct TracingSink;

impl TraceSink for TracingSink {
	fn span_closed(&self, span: &SpanRecord) {
		debug!(
			mcp.tool = %span.name,
			mcp.operation = %span.operation,
			mcp.status = span.status.as_str(),
			mcp.status_message = span.status_message.as_deref().unwrap_or(""),
			mcp.attribute_count = span.attributes.len(),
			"span closed"
		);
	}
	fn capture_exception(&self, span: &SpanHandle, err: &anyhow::Error) {
		let record = span.snapshot();
		error!(
			parent: span.span(),
			exception.message = %err,
			exception.stacktrace = ?err,
			"{} failed",
			record.name
		);
	}
}

/// Process-wide tracing client. Built once in `main` and passed by reference
/// to everything that opens spans or forwards errors.
pub struct Telemetry {
	sink: Arc<dyn TraceSink>,
	provider: Option<sdktrace::TracerProvider>,
}

impl Telemetry {
	pub fn new(sink: Arc<dyn TraceSink>) -> Self {
		Self {
			sink,
			provider: None
		}
	}
	pub fn remote_enabled(&self) -> bool {
		self.provider.is_some()
	}
	pub fn span_closed(&self, span: &SpanRecord) {
		debug_assert_ne!(span.status, SpanStatus::Unset);
		self.sink.span_closed(span);
	}
	pub fn capture_exception(&self, span: &SpanHandle, err: &anyhow::Error) {
		self.sink.capture_exception(span, err);
	}
	pub fn shutdown(self) {
		if let Some(provider) = self.provider {
			for result in provider.force_flush() {
				if let Err(err) = result {
					warn!("telemetry flush failed: {}", err);
				}
			}
		}
	}
}

/// Installs the global subscriber and, when an endpoint is configured, an
/// OTLP exporter feeding the returned client.
pub fn init_tracing(config: &Config) -> Telemetry {
	let _ = global::set_error_handler(|_| {});
	let provider = match config.otel_endpoint.as_deref() {
		Some(endpoint) => build_provider(config, endpoint),
		None => None,
	};
	let tracing_layer = provider.as_ref().map(|provider| {
		let tracer = provider.tracer(config.otel_service_name.clone());
		OpenTelemetryLayer::new(tracer)
	});
	let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_target(false)
		.with_writer(std::io::stderr);
	let subscriber = tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer);
	if let Some(layer) = tracing_layer {
		subscriber.with(layer).init();
	}
	else {
		subscriber.init();
	}
	if config.otel_endpoint.is_some() && provider.is_none() {
		warn!("otlp exporter could not be installed; remote reporting disabled");
	}
	let mut telemetry = Telemetry::new(Arc::new(TracingSink));
	telemetry.provider = provider;
	telemetry
}

fn build_provider(config: &Config, endpoint: &str) -> Option<sdktrace::TracerProvider> {
	let resource = Resource::new(
		vec![
		opentelemetry::KeyValue::new(semconv::SERVICE_NAME, config.otel_service_name.clone()),
		opentelemetry::KeyValue::new(semconv::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
		opentelemetry::KeyValue::new("mcp.session_id", config.session_id.clone()),
		]
	);
	let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint.to_string());
	opentelemetry_otlp::new_pipeline()
		.tracing()
		.with_exporter(exporter)
		.with_trace_config(sdktrace::Config::default().with_resource(resource))
		.install_batch(opentelemetry_sdk::runtime::Tokio)
		.ok()
}

#[cfg(test)]
pub use memory::MemorySink;

#[cfg(test)]
mod memory {
	use super::*;
	use std::sync::Mutex;

	#[derive(Default)]
	pub struct MemorySink {
		spans: Mutex<Vec<SpanRecord>>,
		exceptions: Mutex<Vec<(String, String)>>,
	}

	impl MemorySink {
		pub fn telemetry() -> (Telemetry, Arc<MemorySink>) {
			let sink = Arc::new(MemorySink::default());
			(Telemetry::new(sink.clone()), sink)
		}
		pub fn spans(&self) -> Vec<SpanRecord> {
			self.spans.lock().expect("spans lock").clone()
		}
		pub fn exceptions(&self) -> Vec<(String, String)> {
			self.exceptions.lock().expect("exceptions lock").clone()
		}
	}

	impl TraceSink for MemorySink {
		fn span_closed(&self, span: &SpanRecord) {
			self.spans.lock().expect("spans lock").push(span.clone());
		}
		fn capture_exception(&self, span: &SpanHandle, err: &anyhow::Error) {
			self.exceptions
				.lock()
				.expect("exceptions lock")
				.push((span.snapshot().name, err.to_string()));
		}
	}
}
