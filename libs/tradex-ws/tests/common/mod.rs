//! Common test utilities for tradex-ws integration tests
//!
//! Two kinds of peer are provided:
//! - [`MockServer`]: hand-driven server speaking raw frames, used to script
//!   exact byte sequences (fragments, pings, close, resets, bad status)
//! - [`EchoServer`]: tokio-tungstenite server, an independent RFC 6455
//!   implementation that checks our handshake and masking

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tradex_ws::core::handshake::accept_key;
use tradex_ws::protocol::frame::{encode_frame, Frame, FrameReader, Opcode};
use tradex_ws::{ClientConfig, Event, ReconnectPolicy};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Route client logs to the test output when TEST_VERBOSE is set
pub fn init_test_logging() {
    if std::env::var("TEST_VERBOSE").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("tradex_ws=debug")
            .with_test_writer()
            .try_init();
    }
}

/// Client configuration tuned for fast tests against a local server
pub fn test_config(addr: SocketAddr) -> ClientConfig {
    init_test_logging();
    ClientConfig::new(addr.ip().to_string(), addr.port())
        .with_tls(false)
        .with_credentials("test-token", "C001")
        .with_reconnect(ReconnectPolicy::new(
            3,
            Duration::from_millis(50),
            2.0,
            Duration::from_millis(200),
        ))
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_poll_interval(Duration::from_millis(50))
        .with_handshake_timeout(Duration::from_secs(2))
}

/// Build an event envelope
pub fn envelope(event_type: &str, data: Value) -> String {
    json!({ "eventType": event_type, "data": data }).to_string()
}

/// Poll `condition` every 10ms until it holds or [`WAIT`] elapses
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Collects the `data` of every event a callback receives
pub struct Recorder {
    tx: mpsc::UnboundedSender<Value>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Callback that forwards event data into this recorder
    pub fn callback(&self) -> impl Fn(Event) -> tradex_ws::Result<()> + Send + Sync + 'static {
        let tx = self.tx.clone();
        move |event: Event| {
            let _ = tx.send(event.into_data());
            Ok(())
        }
    }

    /// Next recorded event, or None after [`WAIT`]
    pub async fn next(&mut self) -> Option<Value> {
        timeout(WAIT, self.rx.recv()).await.ok().flatten()
    }

    /// True if nothing arrives within `window`
    pub async fn stays_quiet(&mut self, window: Duration) -> bool {
        timeout(window, self.rx.recv()).await.is_err()
    }
}

/// How the mock server answers the upgrade request
#[derive(Debug, Clone, Copy)]
pub enum HandshakeMode {
    /// `101 Switching Protocols` with the correct accept key
    Accept,
    /// Reply with the given status and close
    Reject(u16),
}

/// A scripted WebSocket server
pub struct MockServer {
    pub addr: SocketAddr,
    attempts: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    shutdown: Arc<Notify>,
}

impl MockServer {
    /// Bind to an ephemeral port and start accepting
    pub async fn start(mode: HandshakeMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(Notify::new());
        let (conn_tx, connections) = mpsc::unbounded_channel();

        let attempts_clone = attempts.clone();
        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        attempts_clone.fetch_add(1, Ordering::SeqCst);
                        let conn_tx = conn_tx.clone();
                        tokio::spawn(async move {
                            if let Some(conn) = ServerConn::handshake(stream, mode).await {
                                let _ = conn_tx.send(conn);
                            }
                        });
                    }
                    _ = shutdown_clone.notified() => break,
                }
            }
        });

        Self {
            addr,
            attempts,
            connections,
            shutdown,
        }
    }

    /// TCP connections accepted so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next connection that completed the handshake
    pub async fn next_connection(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("mock server stopped")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

/// Server side of one accepted connection
pub struct ServerConn {
    /// Raw upgrade request as received
    pub request: String,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    async fn handshake(stream: TcpStream, mode: HandshakeMode) -> Option<Self> {
        let (mut read, mut writer) = stream.into_split();

        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(read.read_u8().await.ok()?);
        }
        let request = String::from_utf8(head).ok()?;
        verbose_println!("mock server got request:\n{}", request);

        match mode {
            HandshakeMode::Accept => {
                let key = request
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("sec-websocket-key"))
                    .map(|(_, value)| value.trim().to_string())?;
                let response = format!(
                    "HTTP/1.1 101 Switching Protocols\r\n\
                     Upgrade: websocket\r\n\
                     Connection: Upgrade\r\n\
                     Sec-WebSocket-Accept: {}\r\n\r\n",
                    accept_key(&key)
                );
                writer.write_all(response.as_bytes()).await.ok()?;
                Some(Self {
                    request,
                    reader: FrameReader::new(read, 1 << 20),
                    writer,
                })
            }
            HandshakeMode::Reject(status) => {
                let response = format!("HTTP/1.1 {} Rejected\r\nContent-Length: 0\r\n\r\n", status);
                let _ = writer.write_all(response.as_bytes()).await;
                let _ = writer.shutdown().await;
                None
            }
        }
    }

    /// Write raw bytes
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Write an unmasked frame
    pub async fn send_frame(&mut self, frame: Frame) {
        self.send_raw(&encode_frame(&frame, None)).await;
    }

    /// Write a text frame, reporting instead of panicking on a dead socket
    pub async fn try_send_text(&mut self, text: &str) -> bool {
        let bytes = encode_frame(&Frame::text(text), None);
        self.writer.write_all(&bytes).await.is_ok() && self.writer.flush().await.is_ok()
    }

    /// Write a single-frame text message
    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(Frame::text(text)).await;
    }

    /// Write an event envelope as one text frame
    pub async fn send_event(&mut self, event_type: &str, data: Value) {
        self.send_text(&envelope(event_type, data)).await;
    }

    /// Next frame from the client, or None on timeout or close
    pub async fn read_frame(&mut self) -> Option<Frame> {
        self.read_frame_within(WAIT).await
    }

    pub async fn read_frame_within(&mut self, window: Duration) -> Option<Frame> {
        match timeout(window, self.reader.read_frame()).await {
            Ok(Ok(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Read frames until one with `opcode` arrives
    pub async fn expect_opcode(&mut self, opcode: Opcode) -> Frame {
        loop {
            let frame = self
                .read_frame()
                .await
                .unwrap_or_else(|| panic!("no {:?} frame from client", opcode));
            if frame.opcode == opcode {
                return frame;
            }
            verbose_println!("skipping {:?} frame while waiting for {:?}", frame.opcode, opcode);
        }
    }
}

/// Echo server built on tokio-tungstenite
pub struct EchoServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => break,
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: TcpStream, shutdown: Arc<Notify>) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() || msg.is_binary() {
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}
