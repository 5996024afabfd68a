//! MJPEG relay server listener
//!
//! Handles the TCP accept loop and spawns one request handler per
//! connection. A handler reads the request head, then either hands the socket
//! to a broadcaster as a new viewer, redirects, or closes it.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::broadcast::BroadcasterHandle;
use crate::error::{ConfigError, ProtocolError, Result};
use crate::media::multipart;
use crate::registry::{Route, RouteRegistry};
use crate::server::config::ServerConfig;
use crate::server::request::{parse_request_path, read_request_head, route_key};
use crate::stats::ServerCounters;

/// MJPEG relay server
pub struct RelayServer {
    config: ServerConfig,
    routes: RouteRegistry,
    counters: Arc<ServerCounters>,
}

/// State shared by all request handlers, frozen once serving starts
struct Shared {
    config: ServerConfig,
    routes: RouteRegistry,
    counters: Arc<ServerCounters>,
}

/// How a request was answered
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Upgraded(String),
    Redirected,
    Closed,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: RouteRegistry::new(),
            counters: Arc::new(ServerCounters::new()),
        }
    }

    /// Register a broadcaster under its route key
    pub fn add_broadcaster(
        &mut self,
        handle: BroadcasterHandle,
    ) -> std::result::Result<(), ConfigError> {
        self.routes.register(handle)
    }

    /// Registered routes
    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    /// Connection counters, readable while the server runs
    pub fn counters(&self) -> Arc<ServerCounters> {
        Arc::clone(&self.counters)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method only returns if binding fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// Every registered broadcaster is stopped on the way out, which also
    /// disconnects its viewers.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, routes = ?self.routes.keys(), "MJPEG relay listening");

        let semaphore = if self.config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(self.config.max_connections)))
        } else {
            None
        };

        let shared = Arc::new(Shared {
            config: self.config,
            routes: self.routes,
            counters: self.counters,
        });

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = accept_loop(&shared, &listener, semaphore) => {}
        }

        shared.routes.stop_all();
        Ok(())
    }
}

async fn accept_loop(
    shared: &Arc<Shared>,
    listener: &TcpListener,
    semaphore: Option<Arc<Semaphore>>,
) {
    let mut next_connection_id: u64 = 1;

    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                handle_connection(
                    shared,
                    socket,
                    peer_addr,
                    next_connection_id,
                    semaphore.as_ref(),
                );
                next_connection_id += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                // Out of descriptors and the like; give the system a moment
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn handle_connection(
    shared: &Arc<Shared>,
    socket: TcpStream,
    peer_addr: SocketAddr,
    connection_id: u64,
    semaphore: Option<&Arc<Semaphore>>,
) {
    shared.counters.connection();

    // Check connection limit
    let permit = match semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                shared.counters.closed();
                return;
            }
        },
        None => None,
    };

    if shared.config.tcp_nodelay {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
        }
    }

    tracing::debug!(connection_id = connection_id, peer = %peer_addr, "New connection");

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let stream = Guarded {
            inner: socket,
            _permit: permit,
        };

        match serve_request(&shared, stream).await {
            Ok(Outcome::Upgraded(key)) => {
                shared.counters.upgraded();
                tracing::info!(
                    connection_id = connection_id,
                    peer = %peer_addr,
                    stream = %key,
                    "Viewer connected"
                );
            }
            Ok(Outcome::Redirected) => {
                shared.counters.redirected();
                tracing::debug!(connection_id = connection_id, "Unknown route, redirected");
            }
            Ok(Outcome::Closed) => {
                shared.counters.closed();
                tracing::debug!(connection_id = connection_id, "Connection closed");
            }
            Err(e) => {
                shared.counters.closed();
                tracing::debug!(connection_id = connection_id, error = %e, "Request rejected");
            }
        }
    });
}

/// Answer one request on `stream`
async fn serve_request<S>(shared: &Shared, mut stream: S) -> Result<Outcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = &shared.config;

    let head = tokio::time::timeout(
        config.header_timeout,
        read_request_head(&mut stream, config.max_header_size),
    )
    .await
    .map_err(|_| ProtocolError::HeaderTimeout)??;

    if head.is_empty() {
        return Ok(Outcome::Closed);
    }

    let path = parse_request_path(&head)?;
    let route = route_key(path).map_or(Route::Unknown, |key| shared.routes.resolve(key));

    match route {
        Route::Streaming(broadcaster) => match broadcaster.attach(stream) {
            Some(_) => Ok(Outcome::Upgraded(broadcaster.key().to_string())),
            None => Ok(Outcome::Closed),
        },
        Route::Stopped => Ok(Outcome::Closed),
        Route::Unknown => {
            let redirect = multipart::redirect();
            tokio::time::timeout(config.header_timeout, stream.write_all(&redirect))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
            let _ = stream.shutdown().await;
            Ok(Outcome::Redirected)
        }
    }
}

/// A socket holding a connection slot until it is dropped
struct Guarded<S> {
    inner: S,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S: AsyncRead + Unpin> AsyncRead for Guarded<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Guarded<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;

    use super::*;
    use crate::broadcast::{BroadcastConfig, FrameBroadcaster, TransformChain};
    use crate::error::Error;
    use crate::media::jpeg::sample_jpeg;
    use crate::media::{blank_jpeg, Frame};
    use crate::source::consumer::{channel, ConsumerQueue, QueuePolicy, SourceEvent};

    fn broadcaster(key: &str) -> (BroadcasterHandle, ConsumerQueue) {
        let (queue, consumer) = channel(QueuePolicy::Unbounded, Duration::from_secs(1));
        let placeholder = Frame::new(blank_jpeg(8, 8), 8, 8, UNIX_EPOCH);
        let chain = TransformChain::new(consumer, placeholder);
        let handle = FrameBroadcaster::new(key, chain, BroadcastConfig::default()).start();
        (handle, queue)
    }

    fn shared(routes: RouteRegistry, config: ServerConfig) -> Shared {
        Shared {
            config,
            routes,
            counters: Arc::new(ServerCounters::new()),
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    async fn request(addr: SocketAddr, line: &str) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(line.as_bytes()).await.unwrap();
        client
    }

    async fn read_until(client: &mut TcpStream, done: impl Fn(&[u8]) -> bool) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];

        tokio::time::timeout(Duration::from_secs(10), async {
            while !done(&received) {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0, "stream ended early");
                received.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .expect("timed out waiting for stream data");

        received
    }

    async fn read_all(client: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        received
    }

    /// Push one frame per route every 20ms
    fn produce(routes: Vec<(ConsumerQueue, Bytes)>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for (queue, jpeg) in &routes {
                    queue.push(SourceEvent::Frame(Frame::decode(jpeg.clone()).unwrap()));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_route_isolation() {
        let (live0, queue0) = broadcaster("0/live");
        let (live1, queue1) = broadcaster("1/live");

        let mut server = RelayServer::new(ServerConfig::default());
        server.add_broadcaster(live0).unwrap();
        server.add_broadcaster(live1).unwrap();
        let counters = server.counters();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_until(listener, async {
            let _ = shutdown_rx.await;
        }));

        let jpeg0 = sample_jpeg(4, 4, 0x0A);
        let jpeg1 = sample_jpeg(4, 4, 0x0B);
        let producer = produce(vec![(queue0, jpeg0.clone()), (queue1, jpeg1.clone())]);

        let mut viewer = request(addr, "GET /stream/0/live HTTP/1.1\r\nHost: relay\r\n\r\n").await;
        let received = read_until(&mut viewer, |r| count(r, &jpeg0) >= 3).await;

        assert!(received.starts_with(b"HTTP/1.0 200 OK\r\n"));
        assert!(contains(&received, b"Content-Type: multipart/x-mixed-replace;boundary=frame\r\n"));
        assert!(!contains(&received, &jpeg1));

        let mut stray = request(addr, "GET /stream/9/live HTTP/1.1\r\n\r\n").await;
        let reply = read_all(&mut stray).await;
        assert!(reply.starts_with(b"HTTP/1.0 302"));

        let mut rude = request(addr, "DELETE /stream/0/live HTTP/1.1\r\n\r\n").await;
        assert!(read_all(&mut rude).await.is_empty());

        let stats = counters.snapshot();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.upgraded, 1);
        assert_eq!(stats.redirected, 1);

        producer.abort();
        shutdown_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();

        // Shutting down stops the broadcaster, which ends the viewer stream
        read_all(&mut viewer).await;
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (live, _queue) = broadcaster("0/live");
        let mut server = RelayServer::new(ServerConfig::default().max_connections(1));
        server.add_broadcaster(live).unwrap();
        let counters = server.counters();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_until(listener, async {
            let _ = shutdown_rx.await;
        }));

        let mut first = request(addr, "GET /stream/0/live HTTP/1.1\r\n\r\n").await;
        read_until(&mut first, |r| contains(r, b"\r\n\r\n")).await;

        // The viewer keeps its slot, so the next connection is dropped unread
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(read_all(&mut second).await.is_empty());
        assert_eq!(counters.snapshot().closed, 1);

        shutdown_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_route_is_closed() {
        let (live, _queue) = broadcaster("0/live");
        live.stop();
        live.stopped().await;

        let mut routes = RouteRegistry::new();
        routes.register(live).unwrap();
        let shared = shared(routes, ServerConfig::default());

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET /stream/0/live HTTP/1.1\r\n\r\n").await.unwrap();

        let outcome = serve_request(&shared, server).await.unwrap();
        assert_eq!(outcome, Outcome::Closed);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_path_outside_stream_prefix_is_redirected() {
        let shared = shared(RouteRegistry::new(), ServerConfig::default());

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n").await.unwrap();

        let outcome = serve_request(&shared, server).await.unwrap();
        assert_eq!(outcome, Outcome::Redirected);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(Bytes::from(reply), multipart::redirect());
    }

    #[tokio::test]
    async fn test_empty_request_is_closed() {
        let shared = shared(RouteRegistry::new(), ServerConfig::default());

        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let outcome = serve_request(&shared, server).await.unwrap();
        assert_eq!(outcome, Outcome::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_timeout() {
        let shared = shared(RouteRegistry::new(), ServerConfig::default());

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"GET /stream/0/live HTTP/1.1\r\n").await.unwrap();

        let result = serve_request(&shared, server).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::HeaderTimeout))));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let config = ServerConfig::default().max_header_size(64);
        let shared = shared(RouteRegistry::new(), config);

        let (mut client, server) = tokio::io::duplex(4096);
        let mut head = b"GET /stream/0/live HTTP/1.1\r\n".to_vec();
        head.extend_from_slice(&[b'x'; 200]);
        client.write_all(&head).await.unwrap();

        let result = serve_request(&shared, server).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::HeaderTooLarge(64)))));
    }
}
