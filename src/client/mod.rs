//! Load-generating client.
//!
//! Data flows `RequestGenerator -> WorkQueue -> Worker xN -> ResultSink`.
//! Teardown runs in a fixed order once the shutdown token is cancelled:
//!
//! 1. the generator stops ticking and closes the work queue,
//! 2. workers drain what is left in the queue and exit,
//! 3. the last worker exit drops the final result sender,
//! 4. the sink drains results in transit and closes its destination.
//!
//! Every channel has one closer: the generator owns the queue sender, and
//! the workers collectively own the result senders.

pub mod generator;
pub mod queue;
pub mod sink;
pub mod worker;

pub use generator::RequestGenerator;
pub use queue::{work_queue, QueueClosed, QueueReceiver, QueueSender};
pub use sink::{Destination, ResultSink, SinkReport};
pub use worker::{Worker, WorkerExit, WorkerReport};

use crate::config::ClientConfig;
use crate::shutdown::{deadline_after, join_until, ShutdownCoordinator};
use crate::transport::{Connector, TransportError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Minimum time the sink gets to finish after the workers are done
const SINK_FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Client startup errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("worker {worker} failed to connect: {source}")]
    Connect {
        worker: usize,
        #[source]
        source: TransportError,
    },
}

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Number of workers and work queue capacity
    pub connections: usize,
    /// Time between generated requests
    pub interval: Duration,
    /// Upper bound on teardown once the generator has stopped
    pub shutdown_timeout: Duration,
}

impl From<&ClientConfig> for PipelineSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connections: config.connections,
            interval: config.interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// What happened during a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub generated: u64,
    pub workers: Vec<WorkerReport>,
    /// `None` if the sink had to be aborted
    pub sink: Option<SinkReport>,
    /// Tasks aborted at the shutdown deadline
    pub aborted: usize,
}

impl RunSummary {
    /// Round trips that produced a result
    pub fn completed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    /// Requests dropped after an error
    pub fn abandoned(&self) -> u64 {
        self.workers.iter().map(|w| w.abandoned).sum()
    }
}

/// Run the pipeline until `shutdown` is triggered or every worker is gone.
///
/// All connections are opened before anything else starts; a failure there
/// aborts startup. Each worker's join handle is collected by this task as
/// it is spawned, so the final wait covers every worker.
pub async fn run<C: Connector>(
    settings: PipelineSettings,
    connector: &C,
    destination: Destination,
    shutdown: ShutdownCoordinator,
) -> Result<RunSummary, ClientError> {
    let connections = settings.connections.max(1);

    let mut transports = Vec::with_capacity(connections);
    for worker in 0..connections {
        let transport = connector
            .connect()
            .await
            .map_err(|source| ClientError::Connect { worker, source })?;
        transports.push(transport);
    }
    info!(connections, "All connections established");

    let (queue_tx, queue_rx) = work_queue(connections);
    let (results_tx, results_rx) = mpsc::channel(connections);

    let sink = tokio::spawn(ResultSink::new(destination).run(results_rx));

    let workers: Vec<_> = transports
        .into_iter()
        .enumerate()
        .map(|(id, transport)| {
            let worker = Worker::new(id, transport, queue_rx.clone(), results_tx.clone());
            tokio::spawn(worker.run())
        })
        .collect();

    // Only workers may hold result senders, and only the generator may
    // hold the queue sender
    drop(results_tx);
    drop(queue_rx);

    let generator = RequestGenerator::new(settings.interval, shutdown.token());
    let generator = tokio::spawn(generator.run(queue_tx));

    info!(
        workers = workers.len(),
        interval_ms = settings.interval.as_millis() as u64,
        "Client running"
    );

    let mut summary = RunSummary::default();

    match generator.await {
        Ok(generated) => summary.generated = generated,
        Err(e) => warn!(error = %e, "Generator task failed"),
    }
    if !shutdown.is_shutting_down() {
        warn!("Every worker stopped, shutting down");
        shutdown.trigger("no workers left");
    }

    let deadline = deadline_after(settings.shutdown_timeout);

    let joins = workers
        .into_iter()
        .enumerate()
        .map(|(id, handle)| async move {
            join_until(&format!("worker-{id}"), handle, deadline).await
        });
    for report in futures::future::join_all(joins).await {
        match report {
            Some(report) => summary.workers.push(report),
            None => summary.aborted += 1,
        }
    }

    // Aborted workers release their result senders asynchronously, so the
    // sink always gets a short window to flush what already arrived
    let sink_deadline = deadline.max(Instant::now() + SINK_FLUSH_GRACE);
    summary.sink = join_until("sink", sink, sink_deadline).await;
    if summary.sink.is_none() {
        summary.aborted += 1;
    }

    info!(
        generated = summary.generated,
        completed = summary.completed(),
        abandoned = summary.abandoned(),
        aborted = summary.aborted,
        "Client stopped"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, Response};
    use crate::transport::{LineTransport, MessageReader, MessageWriter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, DuplexStream};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Answer,
        Silent,
        Refuse,
    }

    /// Connector backed by in-memory pipes with a fake server task behind
    /// each connection
    struct PipeConnector {
        behaviour: Behaviour,
        dialed: AtomicUsize,
        read_timeout: Option<Duration>,
    }

    impl PipeConnector {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                dialed: AtomicUsize::new(0),
                read_timeout: None,
            }
        }
    }

    impl Connector for PipeConnector {
        type Transport = LineTransport<DuplexStream>;

        async fn connect(&self) -> Result<Self::Transport, TransportError> {
            if let Behaviour::Refuse = self.behaviour {
                return Err(TransportError::Closed);
            }
            self.dialed.fetch_add(1, Ordering::SeqCst);

            let (client, server) = duplex(4096);
            let mut server = LineTransport::new(server, None);
            let behaviour = self.behaviour;
            tokio::spawn(async move {
                while let Ok(message) = server.read().await {
                    if let Behaviour::Silent = behaviour {
                        continue;
                    }
                    let request = Request::decode(&message).unwrap();
                    let reply = Response::compute(&request).encode().unwrap();
                    if server.write(reply).await.is_err() {
                        break;
                    }
                }
            });

            Ok(LineTransport::new(client, self.read_timeout))
        }
    }

    fn settings(connections: usize) -> PipelineSettings {
        PipelineSettings {
            connections,
            interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_pipeline_completes_every_generated_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let connector = PipeConnector::new(Behaviour::Answer);
        let shutdown = ShutdownCoordinator::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger("test");
        });

        let destination = Destination::append_file(&path).await.unwrap();
        let summary = run(settings(3), &connector, destination, shutdown)
            .await
            .unwrap();

        assert_eq!(connector.dialed.load(Ordering::SeqCst), 3);
        assert_eq!(summary.workers.len(), 3);
        assert_eq!(summary.aborted, 0);
        assert!(summary.generated > 0);
        assert_eq!(summary.completed(), summary.generated);
        assert_eq!(summary.sink.unwrap().written, summary.completed());
        assert!(summary
            .workers
            .iter()
            .all(|w| w.exit == WorkerExit::Drained));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count() as u64, summary.generated);
        for line in contents.lines() {
            let fields: Vec<i64> = line
                .split(',')
                .map(|f| f.split_once(':').unwrap().1.parse().unwrap())
                .collect();
            assert_eq!(fields[2], fields[0] + fields[1]);
            assert_eq!(fields[3], fields[0] * fields[1]);
        }
    }

    #[tokio::test]
    async fn test_connect_failure_aborts_startup() {
        let connector = PipeConnector::new(Behaviour::Refuse);
        let result = run(
            settings(2),
            &connector,
            Destination::Log,
            ShutdownCoordinator::new(),
        )
        .await;

        assert!(matches!(result, Err(ClientError::Connect { worker: 0, .. })));
    }

    #[tokio::test]
    async fn test_all_workers_lost_ends_run() {
        let mut connector = PipeConnector::new(Behaviour::Silent);
        connector.read_timeout = Some(Duration::from_millis(50));
        let shutdown = ShutdownCoordinator::new();

        let summary = run(settings(2), &connector, Destination::Log, shutdown.clone())
            .await
            .unwrap();

        assert!(shutdown.is_shutting_down());
        assert_eq!(summary.completed(), 0);
        assert!(summary
            .workers
            .iter()
            .all(|w| w.exit == WorkerExit::ConnectionLost));
    }

    #[tokio::test]
    async fn test_stuck_worker_is_aborted_at_deadline() {
        // Silent peer, no read timeout: the worker never gets a reply
        let connector = PipeConnector::new(Behaviour::Silent);
        let shutdown = ShutdownCoordinator::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger("test");
        });

        let started = std::time::Instant::now();
        let summary = run(
            PipelineSettings {
                connections: 1,
                interval: Duration::from_millis(10),
                shutdown_timeout: Duration::from_millis(200),
            },
            &connector,
            Destination::Log,
            shutdown,
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.aborted, 1);
        assert!(summary.workers.is_empty());
        assert_eq!(summary.sink.unwrap().written, 0);
    }
}
