//! TCP server answering arithmetic requests.
//!
//! Accepts connections, runs a [`ConnectionHandler`] per connection, and on
//! shutdown stops accepting and waits a bounded grace period for open
//! connections to finish.

pub mod connection;
pub mod handler;

pub use connection::{ConnState, ConnectionHandler};
pub use handler::{ArithmeticHandler, Handler};

use crate::config::ServerConfig;
use crate::transport::{LineTransport, TransportError};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("connection limit closed")]
    ConnectionLimit(#[from] tokio::sync::AcquireError),
}

/// Server instance
pub struct Server<H> {
    handler: Arc<H>,
    connection_limit: Arc<Semaphore>,
    read_timeout: Option<Duration>,
    grace_period: Duration,
}

impl<H: Handler> Server<H> {
    /// Create a new server instance
    pub fn new(config: &ServerConfig, handler: H) -> Self {
        Server {
            handler: Arc::new(handler),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            read_timeout: config.read_timeout,
            grace_period: config.grace_period,
        }
    }

    /// Accept connections until `shutdown` is cancelled, then wait up to the
    /// grace period for open connections to close.
    pub async fn run(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Server listening");
        }

        let tracker = TaskTracker::new();

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.connection_limit.clone().acquire_owned() => permit?,
            };

            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Connection opened");

                    let handler = Arc::clone(&self.handler);
                    let shutdown = shutdown.clone();
                    let read_timeout = self.read_timeout;

                    tracker.spawn(async move {
                        serve_connection(stream, peer, handler, read_timeout, shutdown).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        drop(listener);
        tracker.close();
        info!(
            open = tracker.len(),
            grace_period_secs = self.grace_period.as_secs(),
            "Stopped accepting, waiting for connections"
        );

        if tokio::time::timeout(self.grace_period, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open = tracker.len(),
                "Grace period elapsed with connections still open"
            );
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Bind the listening socket
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Handle a single client connection
async fn serve_connection<H: Handler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    read_timeout: Option<Duration>,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let mut conn = ConnectionHandler::new(LineTransport::new(stream, read_timeout), handler);
    match conn.serve(&shutdown).await {
        Ok(()) => debug!(%peer, handled = conn.handled(), "Connection closed on shutdown"),
        Err(TransportError::Closed) => {
            debug!(%peer, handled = conn.handled(), "Connection closed by client")
        }
        Err(e) => warn!(%peer, handled = conn.handled(), error = %e, "Connection error"),
    }
}
