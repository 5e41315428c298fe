//! Per-connection read/dispatch loop.
//!
//! A connection is `Open` from accept until the first read error or until
//! shutdown is observed, then `Closed` for good. Exactly one message is
//! handled at a time.

use super::handler::Handler;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading and dispatching messages
    Open,
    /// No further reads will happen
    Closed,
}

/// Drives one accepted connection
pub struct ConnectionHandler<T, H> {
    transport: T,
    handler: Arc<H>,
    state: ConnState,
    handled: u64,
}

impl<T: Transport, H: Handler> ConnectionHandler<T, H> {
    pub fn new(transport: T, handler: Arc<H>) -> Self {
        Self {
            transport,
            handler,
            state: ConnState::Open,
            handled: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of messages passed to the handler
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Read and dispatch messages until shutdown or a read error.
    ///
    /// Shutdown ends the loop with `Ok`. A read error, including the peer
    /// closing the connection, ends it with that error.
    pub async fn serve(&mut self, shutdown: &CancellationToken) -> Result<(), TransportError> {
        while self.state == ConnState::Open {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = self.transport.read() => Some(result),
            };

            let message = match read {
                None => {
                    self.close();
                    break;
                }
                Some(Err(e)) => {
                    self.close();
                    return Err(e);
                }
                Some(Ok(message)) => message,
            };

            if shutdown.is_cancelled() {
                trace!("Shutdown observed after read, dropping message");
                self.close();
                break;
            }

            self.handler.handle(&mut self.transport, message).await;
            self.handled += 1;
        }

        Ok(())
    }

    fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}
