//! Load client entry point.

use arith_load::client::{self, Destination, PipelineSettings};
use arith_load::config::{ClientConfig, SinkMode};
use arith_load::shutdown::ShutdownCoordinator;
use arith_load::transport::TcpConnector;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ClientConfig::load()?;

    arith_load::init_logging(&config.log_level);

    info!(
        server = %config.server_addr,
        connections = config.connections,
        interval_ms = config.interval.as_millis() as u64,
        sink = ?config.sink,
        "Starting arith-client"
    );

    let destination = match config.sink {
        SinkMode::File => Destination::append_file(&config.output).await?,
        SinkMode::Log => Destination::Log,
        SinkMode::Stdout => Destination::stdout(),
    };

    let shutdown = ShutdownCoordinator::new();
    let signals = tokio::spawn(shutdown.clone().listen_for_signals());

    let connector = TcpConnector::new(config.server_addr, config.dial_timeout, config.read_timeout);
    let settings = PipelineSettings::from(&config);
    let result = client::run(settings, &connector, destination, shutdown).await;
    signals.abort();

    let summary = result?;
    info!(
        generated = summary.generated,
        completed = summary.completed(),
        abandoned = summary.abandoned(),
        "Client finished"
    );
    Ok(())
}
