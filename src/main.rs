mod config;
mod fs;
mod protocol;
mod registry;
mod server;
mod span;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
	let config = config::load_config()?;
	if config.print_schema {
		let payload = serde_json::to_string_pretty(&config::config_schema())?;
		println!("{}", payload);
		return Ok(());
	}
	let telemetry = Arc::new(telemetry::init_tracing(&config));
	info!(
		session_id = %config.session_id,
		remote = telemetry.remote_enabled(),
		"starting {}",
		env!("CARGO_PKG_NAME")
	);
	let registry = server::build_registry(&config, telemetry.clone())?;
	let server = server::Server::new(registry, config.session_id.clone());
	let result = server.run().await;
	drop(server);
	if let Ok(telemetry) = Arc::try_unwrap(telemetry) {
		telemetry.shutdown();
	}
	result
}
