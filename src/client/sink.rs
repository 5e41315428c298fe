//! Result sink: the single consumer that records completed round trips.

use bytes::Bytes;
use std::io;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Where result lines end up
pub enum Destination {
    /// Emit each line as an info-level log event
    Log,
    /// Append each line, newline-terminated, to a writer
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Destination {
    /// Open `path` for appending, creating it if needed
    pub async fn append_file(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Destination::Writer(Box::new(file)))
    }

    /// Write to standard output
    pub fn stdout() -> Self {
        Destination::Writer(Box::new(tokio::io::stdout()))
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Log => f.write_str("Log"),
            Destination::Writer(_) => f.write_str("Writer"),
        }
    }
}

/// Counters reported when the sink stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub written: u64,
    pub failed: u64,
}

/// Drains serialized results into a [`Destination`]
#[derive(Debug)]
pub struct ResultSink {
    destination: Destination,
}

impl ResultSink {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }

    /// Consume lines until every sender is dropped, then close the
    /// destination.
    ///
    /// Results still in the channel when the workers exit are written
    /// before the destination is closed. Each line is flushed before the
    /// next is taken, so a write error is counted against the line that
    /// caused it. Errors are logged and the sink moves on.
    pub async fn run(mut self, mut results: mpsc::Receiver<Bytes>) -> SinkReport {
        let mut report = SinkReport::default();

        while let Some(line) = results.recv().await {
            match self.write(&line).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    error!(error = %e, "Failed to write result");
                    report.failed += 1;
                }
            }
        }

        if let Destination::Writer(writer) = &mut self.destination {
            if let Err(e) = writer.flush().await {
                error!(error = %e, "Failed to flush results");
            }
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Failed to close result destination");
            }
        }

        info!(written = report.written, failed = report.failed, "Result sink stopped");
        report
    }

    async fn write(&mut self, line: &[u8]) -> io::Result<()> {
        match &mut self.destination {
            Destination::Log => {
                info!(result = %String::from_utf8_lossy(line), "Result");
                Ok(())
            }
            Destination::Writer(writer) => {
                writer.write_all(line).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// Writer whose every write fails
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that buffers like a file and only fails when a flush would
    /// persist a line containing `bad`
    #[derive(Default)]
    struct FlakyWriter {
        pending: Vec<u8>,
        persisted: Arc<Mutex<Vec<u8>>>,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.pending.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let pending = std::mem::take(&mut self.pending);
            if pending.windows(3).any(|w| w == b"bad") {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "bad sector")));
            }
            self.persisted.lock().unwrap().extend_from_slice(&pending);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_appends_lines_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "existing\n").unwrap();

        let (tx, rx) = mpsc::channel(4);
        let sink = ResultSink::new(Destination::append_file(&path).await.unwrap());
        let handle = tokio::spawn(sink.run(rx));

        tx.send(Bytes::from_static(b"a:3,b:4,s:7,m:12")).await.unwrap();
        tx.send(Bytes::from_static(b"a:5,b:6,s:11,m:30")).await.unwrap();
        drop(tx);

        let report = handle.await.unwrap();
        assert_eq!(report, SinkReport { written: 2, failed: 0 });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "existing\na:3,b:4,s:7,m:12\na:5,b:6,s:11,m:30\n");
    }

    #[tokio::test]
    async fn test_drains_buffered_results_after_senders_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drain.txt");

        let (tx, rx) = mpsc::channel(16);
        for i in 0..10 {
            tx.send(Bytes::from(format!("line{i}"))).await.unwrap();
        }
        drop(tx);

        let sink = ResultSink::new(Destination::append_file(&path).await.unwrap());
        let report = sink.run(rx).await;
        assert_eq!(report.written, 10);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 10);
        assert_eq!(contents.lines().last(), Some("line9"));
    }

    #[tokio::test]
    async fn test_write_errors_are_not_fatal() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"one")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(tx);

        let report = ResultSink::new(Destination::Writer(Box::new(BrokenWriter)))
            .run(rx)
            .await;
        assert_eq!(report, SinkReport { written: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_write_error_counted_against_its_line() {
        let writer = FlakyWriter::default();
        let persisted = Arc::clone(&writer.persisted);

        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"good1")).await.unwrap();
        tx.send(Bytes::from_static(b"bad")).await.unwrap();
        tx.send(Bytes::from_static(b"good2")).await.unwrap();
        drop(tx);

        let report = ResultSink::new(Destination::Writer(Box::new(writer)))
            .run(rx)
            .await;
        assert_eq!(report, SinkReport { written: 2, failed: 1 });
        assert_eq!(persisted.lock().unwrap().as_slice(), b"good1\ngood2\n");
    }

    #[tokio::test]
    async fn test_stdout_destination() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Bytes::from_static(b"a:2,b:2,s:4,m:4")).await.unwrap();
        drop(tx);

        let report = ResultSink::new(Destination::stdout()).run(rx).await;
        assert_eq!(report, SinkReport { written: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_log_destination() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Bytes::from_static(b"a:1,b:1,s:2,m:1")).await.unwrap();
        drop(tx);

        let report = ResultSink::new(Destination::Log).run(rx).await;
        assert_eq!(report.written, 1);
    }
}
