use crate::telemetry::Telemetry;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info_span, Instrument, Span};

#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
	Str(String),
	Int(i64),
	Float(f64),
	Bool(bool),
}

impl From<&str> for AttrValue {
	fn from(value: &str) -> Self {
		AttrValue::Str(value.to_string())
	}
}

impl From<String> for AttrValue {
	fn from(value: String) -> Self {
		AttrValue::Str(value)
	}
}

impl From<i64> for AttrValue {
	fn from(value: i64) -> Self {
		AttrValue::Int(value)
	}
}

impl From<u64> for AttrValue {
	fn from(value: u64) -> Self {
		AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
	}
}

impl From<usize> for AttrValue {
	fn from(value: usize) -> Self {
		AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
	}
}

impl From<f64> for AttrValue {
	fn from(value: f64) -> Self {
		AttrValue::Float(value)
	}
}

impl From<bool> for AttrValue {
	fn from(value: bool) -> Self {
		AttrValue::Bool(value)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanStatus {
	Unset,
	Ok,
	Error,
}

impl SpanStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			SpanStatus::Unset => "unset",
			SpanStatus::Ok => "ok",
			SpanStatus::Error => "error",
		}
	}
}

#[derive(Clone, Debug)]
pub struct SpanRecord {
	pub name: String,
	pub operation: String,
	pub attributes: BTreeMap<String, AttrValue>,
	pub status: SpanStatus,
	pub status_message: Option<String>,
}

impl SpanRecord {
	#[cfg(test)]
	pub fn attr(&self, key: &str) -> Option<&AttrValue> {
		self.attributes.get(key)
	}
}

/// Mutable view of one in-flight span. Clones share the same record.
#[derive(Clone)]
pub struct SpanHandle {
	span: Span,
	record: Arc<Mutex<SpanRecord>>,
}

impl SpanHandle {
	fn open(name: &str, operation: &str) -> Self {
		// tracing needs every field declared here; other keys stay in the record only.
		let span = info_span!(
			"tool.invoke",
			"otel.name" = %name,
			"otel.status_code" = tracing::field::Empty,
			"otel.status_message" = tracing::field::Empty,
			"mcp.operation" = %operation,
			"file.path" = tracing::field::Empty,
			"file.size_bytes" = tracing::field::Empty,
			"file.exists" = tracing::field::Empty,
			"file.content_length" = tracing::field::Empty,
			"file.content_preview" = tracing::field::Empty,
			"directory.path" = tracing::field::Empty,
			"directory.create_error" = tracing::field::Empty,
			"directory.entry_count" = tracing::field::Empty,
			"directory.file_count" = tracing::field::Empty,
			"directory.dir_count" = tracing::field::Empty,
			"directory.total_size_bytes" = tracing::field::Empty,
			"operation.duration_ms" = tracing::field::Empty,
			"error.message" = tracing::field::Empty,
			"error.stack" = tracing::field::Empty,
		);
		Self {
			span,
			record: Arc::new(Mutex::new(SpanRecord {
				name: name.to_string(),
				operation: operation.to_string(),
				attributes: BTreeMap::new(),
				status: SpanStatus::Unset,
				status_message: None,
			}))
		}
	}

	fn lock(&self) -> MutexGuard<'_, SpanRecord> {
		self.record
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn span(&self) -> &Span {
		&self.span
	}

	pub fn set(&self, key: &str, value: impl Into<AttrValue>) {
		let value = value.into();
		match &value {
			AttrValue::Str(text) => self.span.record(key, text.as_str()),
			AttrValue::Int(number) => self.span.record(key, *number),
			AttrValue::Float(number) => self.span.record(key, *number),
			AttrValue::Bool(flag) => self.span.record(key, *flag),
		};
		self.lock().attributes.insert(key.to_string(), value);
	}

	pub fn set_status(&self, status: SpanStatus, message: Option<String>) {
		if status != SpanStatus::Unset {
			self.span.record("otel.status_code", status.as_str());
		}
		if let Some(message) = message.as_deref() {
			self.span.record("otel.status_message", message);
		}
		let mut record = self.lock();
		record.status = status;
		record.status_message = message;
	}

	pub fn status(&self) -> SpanStatus {
		self.lock().status
	}

	pub fn snapshot(&self) -> SpanRecord {
		self.lock().clone()
	}

	fn finish(&self) -> SpanRecord {
		if self.status() == SpanStatus::Unset {
			self.set_status(SpanStatus::Ok, None);
		}
		self.snapshot()
	}
}

/// Runs `body` inside a span named `name`, seeded with `attributes`.
///
/// The body may decorate the span through its handle. When it returns, the
/// status becomes `ok` unless the body already chose one, and the finished
/// record goes to the telemetry sink. Bodies are expected to contain their
/// own failures; see [`crate::fs::contain`].
pub async fn run_traced<T, F, Fut>(
	telemetry: &Telemetry,
	name: &str,
	operation: &str,
	attributes: Vec<(&str, AttrValue)>,
	body: F) -> T
where
	F: FnOnce(SpanHandle) -> Fut,
	Fut: Future<Output = T>, {
	let handle = SpanHandle::open(name, operation);
	for (key, value) in attributes {
		handle.set(key, value);
	}
	let span = handle.span.clone();
	let output = body(handle.clone()).instrument(span).await;
	let record = handle.finish();
	telemetry.span_closed(&record);
	output
}
