use crate::config::Config;
use crate::fs::{self, CreateFileParams, ListFilesParams, ReadFileParams};
use crate::protocol::{ProtocolError, Request, Response, METHOD_NOT_FOUND, PARSE_ERROR};
use crate::registry::{RegistryError, ToolRegistry};
use crate::telemetry::Telemetry;
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, info_span, Instrument, Span};

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub struct Server {
	registry: ToolRegistry,
	session_id: String,
}

pub fn build_registry(config: &Config, telemetry: Arc<Telemetry>) -> Result<ToolRegistry, RegistryError> {
	let mut registry = ToolRegistry::new();
	let create = telemetry.clone();
	registry.register(
		"createfile",
		"Create or overwrite a file with the given content, creating missing parent directories",
		move |params: CreateFileParams| {
			let telemetry = create.clone();
			async move { fs::create_file(&telemetry, params).await }
		}
	)?;
	let read = telemetry.clone();
	registry.register(
		"readfile",
		"Read the full text content of a file",
		move |params: ReadFileParams| {
			let telemetry = read.clone();
			async move { fs::read_file(&telemetry, params).await }
		}
	)?;
	let list = telemetry;
	let concurrency = config.list_concurrency;
	registry.register(
		"listfiles",
		"List the immediate entries of a directory as a Markdown table of name, size and type",
		move |params: ListFilesParams| {
			let telemetry = list.clone();
			async move { fs::list_files(&telemetry, params, concurrency).await }
		}
	)?;
	Ok(registry)
}

impl Server {
	pub fn new(registry: ToolRegistry, session_id: impl Into<String>) -> Self {
		Self {
			registry,
			session_id: session_id.into()
		}
	}

	pub async fn run(&self) -> Result<()> {
		let reader = BufReader::new(io::stdin());
		let writer = io::BufWriter::new(io::stdout());
		self.serve(reader, writer).await
	}

	/// Reads one JSON-RPC message per line until EOF.
	pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
	where
		R: AsyncBufRead + Unpin,
		W: AsyncWrite + Unpin, {
		let mut lines = reader.lines();
		while let Some(line) = lines.next_line().await? {
			if line.trim().is_empty() {
				continue;
			}
			let req: Request = match serde_json::from_str(&line) {
				Ok(req) => req,
				Err(err) => {
					let resp = Response::err(Value::Null, PARSE_ERROR, err.to_string());
					write_response(&mut writer, resp).await?;
					continue;
				}
			};
			if let Some(resp) = self.handle_request(req).await {
				write_response(&mut writer, resp).await?;
			}
		}
		info!("input closed, shutting down");
		Ok(())
	}

	async fn handle_request(&self, req: Request) -> Option<Response> {
		let tool_name = extract_tool_name(&req.method, &req.params);
		let span = info_span!(
			"mcp.request",
			"mcp.session_id" = %self.session_id,
			"mcp.method" = %req.method,
			"mcp.tool_name" = tool_name.as_deref().unwrap_or(""),
			"mcp.is_error" = tracing::field::Empty,
			"mcp.error_code" = tracing::field::Empty,
			"mcp.response_bytes" = tracing::field::Empty,
		);
		let outcome = self.route(&req)
			.instrument(span.clone())
			.await;
		if req.is_notification() {
			return None;
		}
		let id = req.id.unwrap_or(Value::Null);
		let resp = match outcome {
			Ok(value) => {
				record_result(&span, &value);
				Response::ok(id, value)
			}
			Err(err) => {
				span.record("mcp.is_error", true);
				span.record("mcp.error_code", err.code);
				Response::err(id, err.code, err.message)
			}
		};
		Some(resp)
	}

	async fn route(&self, req: &Request) -> Result<Value, ProtocolError> {
		match req.method.as_str() {
			"initialize" => {
				let version = req.params
					.get("protocolVersion")
					.and_then(Value::as_str)
					.unwrap_or(DEFAULT_PROTOCOL_VERSION);
				Ok(json!({
					"protocolVersion": version,
					"serverInfo": {
						"name": env!("CARGO_PKG_NAME"),
						"version": env!("CARGO_PKG_VERSION")
					},
					"capabilities": {
						"tools": {}
					}
				}))
			}
			"ping" => Ok(json!({})),
			"tools/list" => Ok(json!({
				"tools": self.registry.definitions(),
			})),
			"tools/call" => {
				let name = req.params
					.get("name")
					.and_then(Value::as_str)
					.ok_or_else(|| ProtocolError::invalid_params("name is required"))?;
				let arguments = req.params
					.get("arguments")
					.cloned()
					.unwrap_or_else(|| json!({}));
				let envelope = self.registry.dispatch(name, arguments).await?;
				serde_json::to_value(envelope).map_err(|err| ProtocolError::new(-32603, err.to_string()))
			}
			method if method.starts_with("notifications/") => Ok(Value::Null),
			_ => Err(ProtocolError::new(METHOD_NOT_FOUND, "method not found")),
		}
	}
}

fn extract_tool_name(method: &str, params: &Value) -> Option<String> {
	if method != "tools/call" {
		return None;
	}
	params.get("name")
		.and_then(Value::as_str)
		.map(|value| value.to_string())
}

fn record_result(span: &Span, result: &Value) {
	let response_bytes = serde_json::to_string(result).map(|value| value.len() as u64).ok();
	if let Some(bytes) = response_bytes {
		span.record("mcp.response_bytes", bytes);
	}
	span.record("mcp.is_error", false);
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: Response) -> Result<()> {
	let line = serde_json::to_string(&resp)?;
	writer.write_all(line.as_bytes()).await?;
	writer.write_all(b"\n").await?;
	writer.flush().await?;
	Ok(())
}
