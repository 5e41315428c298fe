//! Worker owning one persistent connection.
//!
//! Each worker pulls a request, performs exactly one round trip on its own
//! transport, and forwards the serialized outcome to the sink. There is
//! never more than one request in flight per connection.

use super::queue::QueueReceiver;
use crate::protocol::{CodecError, Outcome, Request, Response};
use crate::transport::{Transport, TransportError};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// Failure of a single round trip
#[derive(Debug, thiserror::Error)]
pub enum RoundTripError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RoundTripError {
    /// Transport failures leave the connection in an unknown state
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, RoundTripError::Transport(_))
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was closed and drained
    Drained,
    /// The connection failed
    ConnectionLost,
    /// The sink stopped accepting results
    SinkClosed,
}

/// Counters reported when a worker stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub completed: u64,
    pub abandoned: u64,
    pub exit: WorkerExit,
}

/// A queue consumer bound to one transport
pub struct Worker<T> {
    id: usize,
    transport: T,
    queue: QueueReceiver,
    results: mpsc::Sender<Bytes>,
}

impl<T: Transport> Worker<T> {
    pub fn new(id: usize, transport: T, queue: QueueReceiver, results: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            transport,
            queue,
            results,
        }
    }

    /// Process requests until the queue is closed and empty or the
    /// connection fails.
    pub async fn run(self) -> WorkerReport {
        let span = tracing::info_span!("worker", worker = self.id);
        self.process().instrument(span).await
    }

    async fn process(mut self) -> WorkerReport {
        let mut completed = 0u64;
        let mut abandoned = 0u64;

        let exit = loop {
            let Some(request) = self.queue.dequeue().await else {
                break WorkerExit::Drained;
            };

            match round_trip(&mut self.transport, request).await {
                Ok(response) => {
                    let outcome = Outcome::new(request, response);
                    debug!(%outcome, "Round trip complete");

                    if self.results.send(outcome.to_line()).await.is_err() {
                        warn!(%outcome, "Result sink closed, dropping result");
                        abandoned += 1;
                        break WorkerExit::SinkClosed;
                    }
                    completed += 1;
                }
                Err(e) if e.is_connection_fatal() => {
                    warn!(error = %e, ?request, "Connection failed, abandoning request");
                    abandoned += 1;
                    break WorkerExit::ConnectionLost;
                }
                Err(e) => {
                    warn!(error = %e, ?request, "Round trip failed, abandoning request");
                    abandoned += 1;
                }
            }
        };

        info!(completed, abandoned, ?exit, "Worker stopped");
        WorkerReport {
            id: self.id,
            completed,
            abandoned,
            exit,
        }
    }
}

/// Send one request and wait for its response
pub async fn round_trip<T: Transport>(
    transport: &mut T,
    request: Request,
) -> Result<Response, RoundTripError> {
    let message = request.encode()?;
    transport.write(message).await?;
    let reply = transport.read().await?;
    Ok(Response::decode(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::queue::work_queue;
    use crate::transport::{LineTransport, MessageReader, MessageWriter};
    use tokio::io::{duplex, DuplexStream};

    fn pipe() -> (LineTransport<DuplexStream>, LineTransport<DuplexStream>) {
        let (a, b) = duplex(4096);
        (LineTransport::new(a, None), LineTransport::new(b, None))
    }

    /// Answers every request correctly except those listed in `garble`,
    /// which get a reply that does not decode.
    async fn fake_server(mut conn: LineTransport<DuplexStream>, garble: Vec<usize>) {
        let mut index = 0;
        while let Ok(message) = conn.read().await {
            let reply = if garble.contains(&index) {
                "garbage".to_string()
            } else {
                let request = Request::decode(&message).unwrap();
                Response::compute(&request).encode().unwrap()
            };
            if conn.write(reply).await.is_err() {
                break;
            }
            index += 1;
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (client, server) = pipe();
        tokio::spawn(fake_server(server, vec![]));

        let mut client = client;
        let response = round_trip(&mut client, Request::new(5, 6)).await.unwrap();
        assert_eq!(response, Response { s: 11, m: 30 });
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let (client, server) = pipe();
        tokio::spawn(fake_server(server, vec![]));

        let (tx, rx) = work_queue(4);
        let (results_tx, mut results_rx) = mpsc::channel(8);
        for i in 0..4 {
            tx.enqueue(Request::new(i, 2)).await.unwrap();
        }
        tx.close();

        let report = Worker::new(0, client, rx, results_tx).run().await;
        assert_eq!(report.completed, 4);
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.exit, WorkerExit::Drained);

        let mut lines = Vec::new();
        while let Some(line) = results_rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines[0].as_ref(), b"a:0,b:2,s:2,m:0");
        assert_eq!(lines[3].as_ref(), b"a:3,b:2,s:5,m:6");
    }

    #[tokio::test]
    async fn test_malformed_response_is_skipped() {
        let (client, server) = pipe();
        tokio::spawn(fake_server(server, vec![1]));

        let (tx, rx) = work_queue(3);
        let (results_tx, mut results_rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.enqueue(Request::new(i, i)).await.unwrap();
        }
        tx.close();

        let report = Worker::new(7, client, rx, results_tx).run().await;
        assert_eq!(report.id, 7);
        assert_eq!(report.completed, 2);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.exit, WorkerExit::Drained);

        assert_eq!(results_rx.recv().await.unwrap().as_ref(), b"a:0,b:0,s:0,m:0");
        assert_eq!(results_rx.recv().await.unwrap().as_ref(), b"a:2,b:2,s:4,m:4");
        assert!(results_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_loss_stops_worker() {
        let (client, server) = pipe();
        drop(server);

        let (tx, rx) = work_queue(2);
        let (results_tx, _results_rx) = mpsc::channel(8);
        tx.enqueue(Request::new(1, 1)).await.unwrap();
        tx.enqueue(Request::new(2, 2)).await.unwrap();

        let report = Worker::new(0, client, rx.clone(), results_tx).run().await;
        assert_eq!(report.exit, WorkerExit::ConnectionLost);
        assert_eq!(report.abandoned, 1);

        // The second request stays queued for the other workers
        assert_eq!(rx.dequeue().await, Some(Request::new(2, 2)));
    }

    #[tokio::test]
    async fn test_sink_closed_stops_worker() {
        let (client, server) = pipe();
        tokio::spawn(fake_server(server, vec![]));

        let (tx, rx) = work_queue(1);
        let (results_tx, results_rx) = mpsc::channel(1);
        drop(results_rx);
        tx.enqueue(Request::new(1, 1)).await.unwrap();

        let report = Worker::new(0, client, rx, results_tx).run().await;
        assert_eq!(report.exit, WorkerExit::SinkClosed);
        assert_eq!(report.completed, 0);
    }
}
