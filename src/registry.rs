use crate::protocol::{Envelope, ProtocolError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
	String,
}

impl ParamKind {
	fn json_type(&self) -> &'static str {
		match self {
			ParamKind::String => "string",
		}
	}
	fn matches(&self, value: &Value) -> bool {
		match self {
			ParamKind::String => value.is_string(),
		}
	}
}

#[derive(Clone, Debug)]
pub struct ParamField {
	pub name: &'static str,
	pub kind: ParamKind,
	pub description: &'static str,
	pub required: bool,
}

impl ParamField {
	pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
		Self {
			name,
			kind,
			description,
			required: true
		}
	}
}

/// Typed arguments of one tool. The contract drives both the advertised
/// `inputSchema` and the structural check run before deserialization.
pub trait ToolParams: DeserializeOwned + Send + 'static {
	fn contract() -> Vec<ParamField>;

	fn validate(&self) -> Result<(), String> {
		Ok(())
	}
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Envelope, ProtocolError>> + Send + Sync>;

pub struct ToolDefinition {
	pub name: String,
	pub description: String,
	pub contract: Vec<ParamField>,
	handler: Handler,
}

impl ToolDefinition {
	pub fn input_schema(&self) -> Value {
		let mut properties = Map::new();
		let mut required = Vec::new();
		for field in &self.contract {
			properties.insert(field.name.to_string(), json!({
				"type": field.kind.json_type(),
				"description": field.description
			}));
			if field.required {
				required.push(Value::String(field.name.to_string()));
			}
		}
		json!({
			"type": "object",
			"properties": properties,
			"required": required
		})
	}
	pub fn describe(&self) -> Value {
		json!({
			"name": self.name,
			"description": self.description,
			"inputSchema": self.input_schema()
		})
	}
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("tool already registered: {0}")]
	Duplicate(String),
}

#[derive(Default)]
pub struct ToolRegistry {
	tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register<P, F, Fut>(
		&mut self,
		name: &str,
		description: &str,
		handler: F) -> Result<(), RegistryError>
	where
		P: ToolParams,
		F: Fn(P) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Envelope> + Send + 'static, {
		if self.get(name).is_some() {
			return Err(RegistryError::Duplicate(name.to_string()));
		}
		let contract = P::contract();
		let checked = contract.clone();
		let handler: Handler = Arc::new(move |raw: Value| {
			match parse_params::<P>(&checked, raw) {
				Ok(params) => handler(params)
					.map(Ok)
					.boxed(),
				Err(err) => futures::future::ready(Err(err)).boxed(),
			}
		});
		self.tools.push(ToolDefinition {
			name: name.to_string(),
			description: description.to_string(),
			contract,
			handler
		});
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
		self.tools
			.iter()
			.find(|tool| tool.name == name)
	}

	pub fn definitions(&self) -> Vec<Value> {
		self.tools
			.iter()
			.map(ToolDefinition::describe)
			.collect()
	}

	pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<Envelope, ProtocolError> {
		let tool = self.get(name).ok_or_else(|| ProtocolError::invalid_params(format!("unknown tool: {}", name)))?;
		(tool.handler)(arguments).await
	}
}

fn check_contract(contract: &[ParamField], raw: &Value) -> Result<(), ProtocolError> {
	let object = raw.as_object().ok_or_else(|| ProtocolError::invalid_params("arguments must be an object"))?;
	for field in contract {
		match object.get(field.name) {
			None | Some(Value::Null) => {
				if field.required {
					return Err(ProtocolError::invalid_params(format!("{} is required", field.name)));
				}
			}
			Some(value) => {
				if !field.kind.matches(value) {
					return Err(ProtocolError::invalid_params(format!(
						"{} must be a {}",
						field.name,
						field.kind.json_type()
					)));
				}
			}
		}
	}
	Ok(())
}

fn parse_params<P: ToolParams>(contract: &[ParamField], raw: Value) -> Result<P, ProtocolError> {
	check_contract(contract, &raw)?;
	let params: P = serde_json::from_value(raw).map_err(|err| ProtocolError::invalid_params(format!("invalid arguments: {}", err)))?;
	params.validate().map_err(ProtocolError::invalid_params)?;
	Ok(params)
}
