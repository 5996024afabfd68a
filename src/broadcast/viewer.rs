//! Viewer connections
//!
//! Each viewer socket gets its own send loop fed by an unbounded channel.
//! The broadcaster hands chunks over without waiting; a viewer that cannot
//! keep up only grows its own backlog.
//!
//! ```text
//!   broadcaster ──send()──► mpsc ──► SendBuffer ──write()──► socket
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransmitError;

/// Default limit for a single socket write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Viewer connection options
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Longest a single socket write may take before the viewer is dropped
    pub write_timeout: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ViewerConfig {
    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Bytes queued for a socket but not yet written
#[derive(Debug, Default)]
pub struct SendBuffer {
    buf: BytesMut,
}

impl SendBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk behind whatever is pending
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes waiting to be written
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the first `n` bytes after a (possibly partial) write
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.len()));
    }

    /// Number of pending bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if everything has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Broadcaster's end of a viewer connection
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
}

impl ViewerHandle {
    /// Viewer identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a chunk for this viewer
    ///
    /// Returns false once the viewer has disconnected.
    pub fn send(&self, chunk: Bytes) -> bool {
        self.is_connected() && self.tx.send(chunk).is_ok()
    }

    /// Whether the send loop is still running
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

/// Send loop for one viewer socket
pub struct ViewerConnection<W> {
    id: u64,
    writer: W,
    rx: mpsc::UnboundedReceiver<Bytes>,
    buffer: SendBuffer,
    config: ViewerConfig,
    connected: Arc<AtomicBool>,
    kill: CancellationToken,
    bytes_sent: u64,
}

impl<W> ViewerConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a socket, returning the connection and its handle
    pub fn new(
        id: u64,
        writer: W,
        config: ViewerConfig,
        kill: CancellationToken,
    ) -> (Self, ViewerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let handle = ViewerHandle {
            id,
            tx,
            connected: Arc::clone(&connected),
        };

        let connection = Self {
            id,
            writer,
            rx,
            buffer: SendBuffer::new(),
            config,
            connected,
            kill,
            bytes_sent: 0,
        };

        (connection, handle)
    }

    /// Wrap a socket and spawn its send loop
    pub fn spawn(
        id: u64,
        writer: W,
        config: ViewerConfig,
        kill: CancellationToken,
    ) -> ViewerHandle {
        let (connection, handle) = Self::new(id, writer, config, kill);

        tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                tracing::debug!(viewer_id = id, error = %e, "Viewer disconnected");
            }
        });

        handle
    }

    /// Run the send loop until the viewer fails, is killed, or the
    /// broadcaster goes away
    pub async fn run(mut self) -> Result<(), TransmitError> {
        let kill = self.kill.clone();
        tracing::debug!(viewer_id = self.id, "Viewer send loop started");

        let result = loop {
            let chunk = tokio::select! {
                biased;
                _ = kill.cancelled() => break Ok(()),
                chunk = self.rx.recv() => chunk,
            };

            if kill.is_cancelled() {
                break Ok(());
            }

            match chunk {
                Some(chunk) => self.buffer.extend(&chunk),
                None => break Ok(()),
            }

            while let Ok(chunk) = self.rx.try_recv() {
                self.buffer.extend(&chunk);
            }

            let flushed = tokio::select! {
                biased;
                _ = kill.cancelled() => break Ok(()),
                flushed = self.flush() => flushed,
            };

            if let Err(e) = flushed {
                break Err(e);
            }
        };

        self.connected.store(false, Ordering::Release);
        self.rx.close();

        if result.is_ok() {
            let _ = tokio::time::timeout(self.config.write_timeout, self.writer.shutdown()).await;
        }

        tracing::debug!(
            viewer_id = self.id,
            bytes_sent = self.bytes_sent,
            unsent = self.buffer.len(),
            "Viewer send loop ended"
        );

        result
    }

    /// Write out the send buffer
    async fn flush(&mut self) -> Result<(), TransmitError> {
        let write_timeout = self.config.write_timeout;

        while !self.buffer.is_empty() {
            let write = self.writer.write(self.buffer.pending());
            let written = tokio::time::timeout(write_timeout, write)
                .await
                .map_err(|_| TransmitError::Timeout(write_timeout))?
                .map_err(TransmitError::Write)?;

            if written == 0 {
                return Err(TransmitError::WriteZero);
            }

            self.buffer.consume(written);
            self.bytes_sent += written as u64;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio_test::io::Builder;

    use super::*;

    fn viewer<W>(writer: W) -> (ViewerConnection<W>, ViewerHandle, CancellationToken)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let kill = CancellationToken::new();
        let (connection, handle) =
            ViewerConnection::new(1, writer, ViewerConfig::default(), kill.clone());
        (connection, handle, kill)
    }

    #[test]
    fn test_send_buffer_keeps_suffix() {
        let mut buffer = SendBuffer::new();
        buffer.extend(b"hello ");
        buffer.extend(b"world");

        buffer.consume(4);
        assert_eq!(buffer.pending(), b"o world");

        buffer.consume(100);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_partial_writes_resume_from_suffix() {
        let mock = Builder::new()
            .write(b"hello ")
            .wait(Duration::from_millis(5))
            .write(b"world")
            .build();
        let (connection, handle, _kill) = viewer(mock);

        assert!(handle.send(Bytes::from_static(b"hello world")));
        drop(handle);

        assert!(connection.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_queued_chunks_are_coalesced_in_order() {
        let mock = Builder::new().write(b"abc").build();
        let (connection, handle, _kill) = viewer(mock);

        for chunk in [&b"a"[..], b"b", b"c"] {
            handle.send(Bytes::copy_from_slice(chunk));
        }
        drop(handle);

        assert!(connection.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_write_error_disconnects() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (connection, handle, _kill) = viewer(mock);

        handle.send(Bytes::from_static(b"frame"));
        let result = connection.run().await;

        assert!(matches!(result, Err(TransmitError::Write(_))));
        assert!(!handle.is_connected());
        assert!(!handle.send(Bytes::from_static(b"more")));
    }

    /// Socket that accepts nothing
    struct ZeroWriter;

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_zero_length_write_disconnects() {
        let (connection, handle, _kill) = viewer(ZeroWriter);

        handle.send(Bytes::from_static(b"frame"));
        let result = connection.run().await;

        assert!(matches!(result, Err(TransmitError::WriteZero)));
        assert!(!handle.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_socket_times_out() {
        let mock = Builder::new().wait(Duration::from_secs(60)).build();
        let (connection, handle, _kill) = viewer(mock);

        handle.send(Bytes::from_static(b"frame"));
        let result = connection.run().await;

        assert!(matches!(result, Err(TransmitError::Timeout(t)) if t == DEFAULT_WRITE_TIMEOUT));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_kill_ends_loop() {
        let mock = Builder::new().build();
        let (connection, handle, kill) = viewer(mock);

        let task = tokio::spawn(connection.run());
        kill.cancel();

        assert!(task.await.unwrap().is_ok());
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_kill_wins_over_pending_chunk() {
        let mock = Builder::new().build();
        let (connection, handle, kill) = viewer(mock);

        handle.send(Bytes::from_static(b"never written"));
        kill.cancel();

        assert!(connection.run().await.is_ok());
    }
}
