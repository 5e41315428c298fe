//! Message transport between client workers and the server.
//!
//! A transport is an ordered, message-framed duplex channel carrying UTF-8
//! text. The concrete adapter, [`LineTransport`], frames one message per
//! `\n`-terminated line over any async byte stream (TCP in production,
//! in-memory duplex pipes in tests).

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

/// Maximum length of a single message in bytes
pub const MAX_MESSAGE_LENGTH: usize = 64 * 1024;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("no message received within {0:?}")]
    Timeout(Duration),
    #[error("message exceeds {} bytes", MAX_MESSAGE_LENGTH)]
    MessageTooLong,
    #[error("message is not valid text: {0}")]
    NotText(io::Error),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::MessageTooLong,
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                TransportError::NotText(e)
            }
            LinesCodecError::Io(e) => TransportError::Io(e),
        }
    }
}

/// Write half of a transport
pub trait MessageWriter: Send {
    /// Send one complete message
    fn write(&mut self, message: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Read half of a transport
pub trait MessageReader: Send {
    /// Wait for the next complete message
    fn read(&mut self) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// A duplex message channel
pub trait Transport: MessageReader + MessageWriter {}

impl<T: MessageReader + MessageWriter> Transport for T {}

/// Line-framed transport over an async byte stream
pub struct LineTransport<S> {
    framed: Framed<S, LinesCodec>,
    read_timeout: Option<Duration>,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream. `read_timeout` bounds each call to `read`.
    pub fn new(stream: S, read_timeout: Option<Duration>) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_MESSAGE_LENGTH)),
            read_timeout,
        }
    }

    /// Flush and close the underlying stream
    pub async fn close(mut self) -> Result<(), TransportError> {
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

impl<S> MessageWriter for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, message: String) -> Result<(), TransportError> {
        self.framed.send(message).await?;
        Ok(())
    }
}

impl<S> MessageReader for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self) -> Result<String, TransportError> {
        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed.next())
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.framed.next().await,
        };

        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Closed),
        }
    }
}

/// Factory for fresh transports, one per worker
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Dials the server over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    dial_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, dial_timeout: Duration, read_timeout: Option<Duration>) -> Self {
        Self {
            addr,
            dial_timeout,
            read_timeout,
        }
    }
}

impl Connector for TcpConnector {
    type Transport = LineTransport<TcpStream>;

    async fn connect(&self) -> Result<Self::Transport, TransportError> {
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: self.addr,
                timeout: self.dial_timeout,
            })?
            .map_err(|source| TransportError::Connect {
                addr: self.addr,
                source,
            })?;

        stream.set_nodelay(true)?;
        debug!(peer = %self.addr, "Connection established");

        Ok(LineTransport::new(stream, self.read_timeout))
    }
}
