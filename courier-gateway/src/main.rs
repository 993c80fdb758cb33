//! Courier gateway - main entry point.

use anyhow::Result;
use courier_common::config::Config;
use courier_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Courier gateway v{}", env!("CARGO_PKG_VERSION"));

    // Channel adapters are registered by the embedding deployment;
    // the bare binary serves correlation state and lifecycle routes.
    courier_gateway::start_server(&config, Vec::new()).await
}
