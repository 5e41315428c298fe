//! Periodic request generator.

use super::queue::QueueSender;
use crate::protocol::Request;
use crate::shutdown::deadline_after;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Emits one random request per tick into the work queue
pub struct RequestGenerator {
    interval: Duration,
    shutdown: CancellationToken,
}

impl RequestGenerator {
    pub fn new(interval: Duration, shutdown: CancellationToken) -> Self {
        Self { interval, shutdown }
    }

    /// Run until cancelled, then close the queue.
    ///
    /// Blocks on a full queue until a worker frees a slot or shutdown is
    /// requested. The generator is the only holder of the sender, so the
    /// close happens exactly once and only after the last enqueue has
    /// finished. Returns the number of requests enqueued.
    pub async fn run(self, queue: QueueSender) -> u64 {
        // First tick fires one interval after start, not immediately
        let start = deadline_after(self.interval);
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut generated = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let request = Request::random();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(?request, "Dropping request, queue full at shutdown");
                    break;
                }
                result = queue.enqueue(request) => {
                    if result.is_err() {
                        debug!("All workers gone, stopping generator");
                        break;
                    }
                    generated += 1;
                    trace!(?request, pending = queue.len(), "Request enqueued");
                }
            }
        }

        queue.close();
        info!(generated, "Generator stopped, work queue closed");
        generated
    }
}
