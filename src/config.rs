use anyhow::{anyhow, Result};
use serde_json::{json, Value};

pub const DEFAULT_SERVICE_NAME: &str = "mcp-fs-trace";
pub const DEFAULT_LIST_CONCURRENCY: usize = 32;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug)]
pub struct Config {
	pub otel_endpoint: Option<String>,
	pub otel_service_name: String,
	pub list_concurrency: usize,
	pub log_filter: String,
	pub print_schema: bool,
	pub session_id: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			otel_endpoint: None,
			otel_service_name: DEFAULT_SERVICE_NAME.to_string(),
			list_concurrency: DEFAULT_LIST_CONCURRENCY,
			log_filter: DEFAULT_LOG_FILTER.to_string(),
			print_schema: false,
			session_id: uuid::Uuid::new_v4().to_string(),
		}
	}
}

pub fn load_config() -> Result<Config> {
	parse_config(std::env::args().skip(1), |key| std::env::var(key).ok())
}

/// Flags win over environment variables; blank environment values count as unset.
pub fn parse_config<I, E>(args: I, env: E) -> Result<Config>
where
	I: IntoIterator<Item = String>,
	E: Fn(&str) -> Option<String>, {
	let mut config = Config::default();
	let mut endpoint_flag: Option<String> = None;
	let mut service_flag: Option<String> = None;
	let mut concurrency_flag: Option<usize> = None;
	let mut log_flag: Option<String> = None;
	let mut args = args.into_iter();
	while let Some(arg) = args.next() {
		match arg.as_str() {
			"--otel-endpoint" => {
				let value = args.next().ok_or_else(|| anyhow!("--otel-endpoint requires a value"))?;
				endpoint_flag = Some(value);
			}
			"--otel-service-name" => {
				let value = args.next().ok_or_else(|| anyhow!("--otel-service-name requires a value"))?;
				service_flag = Some(value);
			}
			"--list-concurrency" => {
				let value = args.next().ok_or_else(|| anyhow!("--list-concurrency requires a value"))?;
				concurrency_flag = Some(parse_concurrency(&value, "--list-concurrency")?);
			}
			"--log" => {
				let value = args.next().ok_or_else(|| anyhow!("--log requires a value"))?;
				log_flag = Some(value);
			}
			"--print-config-schema" => {
				config.print_schema = true;
			}
			_ => return Err(anyhow!("unknown argument: {}", arg)),
		}
	}
	let env_value = |key: &str| env(key).filter(|value| !value.trim().is_empty());
	config.otel_endpoint = endpoint_flag
		.or_else(|| env_value("MCP_OTEL_ENDPOINT"))
		.filter(|value| !value.trim().is_empty());
	if let Some(service) = service_flag.or_else(|| env_value("MCP_OTEL_SERVICE_NAME")) {
		config.otel_service_name = service;
	}
	if let Some(limit) = concurrency_flag {
		config.list_concurrency = limit;
	}
	else if let Some(raw) = env_value("MCP_LIST_CONCURRENCY") {
		config.list_concurrency = parse_concurrency(&raw, "MCP_LIST_CONCURRENCY")?;
	}
	if let Some(filter) = log_flag.or_else(|| env_value("MCP_LOG")) {
		config.log_filter = filter;
	}
	Ok(config)
}

fn parse_concurrency(value: &str, label: &str) -> Result<usize> {
	let parsed = value.trim()
		.parse::<usize>()
		.map_err(|_| anyhow!("{} must be a positive integer", label))?;
	if parsed == 0 {
		return Err(anyhow!("{} must be greater than 0", label));
	}
	Ok(parsed)
}

pub fn config_schema() -> Value {
	json!({
		"$schema": "http://json-schema.org/draft-07/schema#",
		"title": "mcp-fs-trace configuration",
		"type": "object",
		"properties": {
			"otel_endpoint": {
				"type": "string",
				"description": "OTLP gRPC collector endpoint. Flag --otel-endpoint, env MCP_OTEL_ENDPOINT. Unset disables remote export."
			},
			"otel_service_name": {
				"type": "string",
				"default": DEFAULT_SERVICE_NAME,
				"description": "service.name resource attribute. Flag --otel-service-name, env MCP_OTEL_SERVICE_NAME."
			},
			"list_concurrency": {
				"type": "integer",
				"minimum": 1,
				"default": DEFAULT_LIST_CONCURRENCY,
				"description": "Maximum concurrent stats while listing a directory. Flag --list-concurrency, env MCP_LIST_CONCURRENCY."
			},
			"log": {
				"type": "string",
				"default": DEFAULT_LOG_FILTER,
				"description": "tracing filter directive for stderr logs. Flag --log, env MCP_LOG."
			}
		},
		"additionalProperties": false
	})
}
