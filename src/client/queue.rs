//! Bounded FIFO of pending requests between the generator and the workers.
//!
//! The queue has exactly one producer handle, [`QueueSender`], owned by the
//! generator. Closing consumes that handle, so the queue is closed at most
//! once and nothing can be enqueued afterwards. Consumers share a
//! [`QueueReceiver`]; once the queue is closed they drain what is left and
//! then observe `None`.

use crate::protocol::Request;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Returned by `enqueue` when every receiver is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("work queue is closed")]
pub struct QueueClosed;

/// Create a queue holding at most `capacity` pending requests.
///
/// A capacity of zero is raised to one.
pub fn work_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// The single producer end of the queue
#[derive(Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<Request>,
}

impl QueueSender {
    /// Append a request, waiting while the queue is full
    pub async fn enqueue(&self, request: Request) -> Result<(), QueueClosed> {
        self.tx.send(request).await.map_err(|_| QueueClosed)
    }

    /// Maximum number of pending requests
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of requests currently waiting
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Close the queue. Pending requests remain available to consumers.
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Shared consumer end of the queue
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Request>>>,
}

impl QueueReceiver {
    /// Take the oldest request.
    ///
    /// Waits while the queue is empty and open; returns `None` once the
    /// queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Request> {
        self.rx.lock().await.recv().await
    }
}
