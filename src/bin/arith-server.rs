//! Arithmetic server entry point.

use arith_load::config::ServerConfig;
use arith_load::server::{self, ArithmeticHandler, Server};
use arith_load::shutdown::ShutdownCoordinator;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::load()?;

    arith_load::init_logging(&config.log_level);

    info!(
        listen = %config.listen,
        grace_period_secs = config.grace_period.as_secs(),
        max_connections = config.max_connections,
        "Starting arith-server"
    );

    let listener = server::bind(config.listen).await?;

    let shutdown = ShutdownCoordinator::new();
    let signals = tokio::spawn(shutdown.clone().listen_for_signals());

    let server = Server::new(&config, ArithmeticHandler);
    let result = server.run(listener, shutdown.token()).await;
    signals.abort();

    result?;
    Ok(())
}
