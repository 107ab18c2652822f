use crate::core::config::ClientConfig;
use crate::core::connection::{self, Connection, Established, Outbound};
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::core::pong_tracker::PongTracker;
use crate::protocol::dispatcher::{Dispatcher, EventHandler};
use crate::protocol::error::{Result, TradexWsError};
use crate::protocol::event::Event;
use crate::protocol::frame::Frame;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Granularity of the stop check while sleeping between attempts
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle notifications from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake completed and connection tasks are running
    Connected,
    /// The current connection ended (fault or stop)
    Disconnected,
    /// About to retry (attempt number, 1 = first retry)
    Reconnecting(usize),
    /// A connection attempt failed
    Error(String),
}

/// Client metrics snapshot
#[derive(Debug, Clone)]
pub struct Metrics {
    pub frames_sent: u64,
    pub messages_received: u64,
    pub messages_dispatched: u64,
    pub reconnect_count: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub connection_state: ConnectionState,
    /// False when the last ping went unanswered for more than two heartbeat
    /// intervals. Informational only.
    pub pong_healthy: bool,
}

/// State shared by the client handle and its connection tasks
pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) state: AtomicConnectionState,
    pub(crate) metrics: AtomicMetrics,
    pub(crate) pong_tracker: PongTracker,
    pub(crate) dispatcher: Dispatcher,
    /// Cleared by `stop()` and on retry exhaustion
    running: AtomicBool,
    /// Set while a reconnect task owns the retry loop
    reconnecting: AtomicBool,
    /// Incremented by every `start()`; retry loops of older runs bail out
    run: AtomicU64,
    /// Current epoch; the lock covers the swap only
    connection: Mutex<Option<Connection>>,
    next_epoch: AtomicU64,
    event_tx: Sender<ClientEvent>,
}

impl ClientShared {
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_current_run(&self, run: u64) -> bool {
        self.is_running() && self.run.load(Ordering::Acquire) == run
    }

    /// Dispatch gate that closes once `run` is stopped or superseded
    pub(crate) fn run_gate(self: &Arc<Self>, run: u64) -> impl Fn() -> bool + Send + 'static {
        let shared = Arc::clone(self);
        move || shared.is_current_run(run)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// WebSocket client for the TradeX event stream
///
/// Owns the connection lifecycle: connect with retries, heartbeat, receive,
/// dispatch to registered callbacks, and reconnection after transport
/// faults. Cloning yields another handle to the same client.
///
/// # Example
///
/// ```ignore
/// let config = ClientConfig::new("ws.tradex.example", 443).with_credentials(token, client_id);
/// let client = TradexWsClient::new(config);
///
/// client.register_callback("trade", |event: Event| {
///     info!("trade: {}", event.data());
///     Ok(())
/// });
///
/// if client.start().await {
///     client.send_message(r#"{"action":"subscribe"}"#).await;
/// }
/// // ...
/// client.stop().await;
/// ```
#[derive(Clone)]
pub struct TradexWsClient {
    shared: Arc<ClientShared>,
    event_rx: Receiver<ClientEvent>,
}

impl TradexWsClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        let grace = config.heartbeat_interval.saturating_mul(2);

        let shared = Arc::new(ClientShared {
            config,
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            metrics: AtomicMetrics::new(),
            pong_tracker: PongTracker::new(grace),
            dispatcher: Dispatcher::new(),
            running: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            run: AtomicU64::new(0),
            connection: Mutex::new(None),
            next_epoch: AtomicU64::new(0),
            event_tx,
        });

        Self { shared, event_rx }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Connect, retrying per the reconnect policy
    ///
    /// Returns true once connected. Returns false if the configuration is
    /// invalid, every attempt failed, or `stop()` was called meanwhile.
    /// Calling `start()` on a client that is already connected returns true
    /// without reconnecting.
    pub async fn start(&self) -> bool {
        if let Err(e) = self.shared.config.validate() {
            error!("Refusing to start: {}", e);
            return false;
        }

        if let Err(current) = self
            .shared
            .state
            .compare_exchange(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            warn!("start() called while {}", current);
            return current == ConnectionState::Connected;
        }

        let run = self.shared.run.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.running.store(true, Ordering::Release);
        info!("Starting WebSocket client for {}", self.shared.config.display_url());

        match connect_with_retry(&self.shared, run, false).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Close the connection and stop reconnecting
    ///
    /// Sends a Close frame best-effort, waits for the connection tasks and
    /// leaves the client Disconnected. Safe to call repeatedly.
    pub async fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if !was_running && self.shared.state.is_disconnected() {
            debug!("stop() called on a stopped client");
            return;
        }

        self.shared.state.set(ConnectionState::Closing);
        info!("Stopping WebSocket client");

        let current = self.shared.connection.lock().take();
        if let Some(connection) = current {
            connection.close(true).await;
            self.shared.emit(ClientEvent::Disconnected);
        }

        self.shared.state.set(ConnectionState::Disconnected);
        info!("WebSocket client stopped");
    }

    /// Register the callback for an event type, replacing any previous one
    ///
    /// Registrations survive reconnection.
    pub fn register_callback<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.register(event_type, handler);
    }

    /// Register a handler object for an event type
    pub fn register_handler<H: EventHandler>(&self, event_type: impl Into<String>, handler: H) {
        self.shared.dispatcher.register_handler(event_type, handler);
    }

    pub fn unregister_callback(&self, event_type: &str) -> bool {
        self.shared.dispatcher.unregister(event_type)
    }

    /// Send a text message
    ///
    /// Returns true once the frame has been written to the socket.
    pub async fn send_message(&self, text: &str) -> bool {
        match self.try_send_message(text).await {
            Ok(()) => true,
            Err(TradexWsError::NotConnected) => {
                error!("Not connected. Cannot send message.");
                false
            }
            Err(e) => {
                error!("Failed to send message: {}", e);
                false
            }
        }
    }

    /// Like [`send_message`](Self::send_message), with the failure reason
    pub async fn try_send_message(&self, text: &str) -> Result<()> {
        let outbound = {
            let current = self.shared.connection.lock();
            current.as_ref().map(Connection::outbound)
        };
        let outbound = outbound.ok_or(TradexWsError::NotConnected)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        outbound
            .send(Outbound::Frame {
                frame: Frame::text(text),
                ack: Some(ack_tx),
            })
            .map_err(|_| TradexWsError::ChannelSend("writer task has exited".into()))?;

        match ack_rx.await {
            Ok(true) => {
                debug!("Sent message: {}", text);
                Ok(())
            }
            Ok(false) => Err(TradexWsError::ConnectionClosed("write failed".into())),
            Err(_) => Err(TradexWsError::ChannelSend("writer task has exited".into())),
        }
    }

    /// Get current connection state
    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Check if connected
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Whether the client is started and has not been stopped or exhausted
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Get current metrics
    pub fn metrics(&self) -> Metrics {
        let m = &self.shared.metrics;
        Metrics {
            frames_sent: m.frames_sent(),
            messages_received: m.messages_received(),
            messages_dispatched: m.messages_dispatched(),
            reconnect_count: m.reconnect_count(),
            pings_sent: m.pings_sent(),
            pongs_received: m.pongs_received(),
            connection_state: self.shared.state.get(),
            pong_healthy: self.shared.pong_tracker.is_healthy(),
        }
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<ClientEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Receive an event, waiting at most `timeout`
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Open one connection: TCP, TLS, handshake
pub(crate) async fn connect(shared: &Arc<ClientShared>) -> Result<Established> {
    connection::establish(&shared.config).await
}

/// Attempt to connect until success, exhaustion or stop
///
/// On exhaustion the client settles Disconnected and stops running; a new
/// `start()` is required.
pub(crate) async fn connect_with_retry(
    shared: &Arc<ClientShared>,
    run: u64,
    reconnect: bool,
) -> Result<()> {
    let policy = &shared.config.reconnect;
    let mut attempt = 0;
    let mut last_error = String::from("no attempt made");

    while let Some(delay) = policy.next_delay(attempt) {
        if !shared.is_current_run(run) {
            return Err(abandon(shared));
        }

        if attempt > 0 {
            info!(
                attempt = attempt + 1,
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                policy.max_attempts
            );
            shared.emit(ClientEvent::Reconnecting(attempt));
            if !interruptible_sleep(shared, run, delay).await {
                debug!("Stop requested during reconnection delay");
                return Err(abandon(shared));
            }
        }

        match connect(shared).await {
            Ok(established) => {
                if !install(shared, run, established) {
                    return Err(abandon(shared));
                }
                if reconnect {
                    shared.metrics.increment_reconnects();
                }
                shared.emit(ClientEvent::Connected);
                return Ok(());
            }
            Err(e) => {
                warn!(attempt = attempt + 1, "Connection attempt failed: {}", e);
                shared.emit(ClientEvent::Error(e.to_string()));
                last_error = e.to_string();
            }
        }

        attempt += 1;
    }

    if !shared.is_current_run(run) {
        return Err(abandon(shared));
    }

    error!("Failed to connect after {} attempts. Giving up.", attempt);
    shared.reconnecting.store(false, Ordering::Release);
    shared.running.store(false, Ordering::Release);
    for from in [ConnectionState::Connecting, ConnectionState::Reconnecting] {
        let _ = shared.state.compare_exchange(from, ConnectionState::Disconnected);
    }

    Err(TradexWsError::ReconnectionFailed {
        attempts: attempt,
        reason: last_error,
    })
}

/// Leave the retry loop because the client was stopped
fn abandon(shared: &ClientShared) -> TradexWsError {
    shared.reconnecting.store(false, Ordering::Release);
    TradexWsError::ConnectionClosed("client stopped".into())
}

/// Make a freshly handshaken socket the current connection
///
/// Returns false (dropping the socket) if the client was stopped while the
/// attempt was in flight.
fn install(shared: &Arc<ClientShared>, run: u64, established: Established) -> bool {
    let mut current = shared.connection.lock();
    if !shared.is_current_run(run) {
        return false;
    }

    let epoch = shared.next_epoch.fetch_add(1, Ordering::AcqRel) + 1;
    shared.pong_tracker.reset();
    // Cleared before the new tasks exist so their first fault is not ignored
    shared.reconnecting.store(false, Ordering::Release);

    shared.state.set(ConnectionState::Connected);
    if let Some(previous) = current.replace(Connection::spawn(shared, run, epoch, established)) {
        previous.signal_shutdown();
    }
    debug!(epoch, "Connection installed");
    true
}

/// Sleep for `delay`, waking every 100ms to check for a stop request
///
/// Returns false if the client was stopped.
async fn interruptible_sleep(shared: &ClientShared, run: u64, delay: Duration) -> bool {
    let mut elapsed = Duration::ZERO;
    while elapsed < delay {
        if !shared.is_current_run(run) {
            return false;
        }
        let step = STOP_CHECK_INTERVAL.min(delay - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
    }
    shared.is_current_run(run)
}

/// Entry point for transport faults raised by the tasks of `epoch`
///
/// The first report for the current epoch tears it down and spawns the
/// reconnect task. Reports while a reconnect is running, reports from older
/// epochs and reports after `stop()` are ignored.
pub(crate) fn handle_failure(shared: &Arc<ClientShared>, epoch: u64, error: TradexWsError) {
    if !shared.is_running() {
        debug!(epoch, "Ignoring connection failure after stop: {}", error);
        return;
    }

    let mut current = shared.connection.lock();
    let failed = match current.take() {
        Some(connection) if connection.epoch == epoch => connection,
        other => {
            *current = other;
            debug!(epoch, "Ignoring failure from stale connection: {}", error);
            return;
        }
    };
    if shared
        .reconnecting
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        *current = Some(failed);
        debug!(epoch, "Reconnection already in progress");
        return;
    }
    drop(current);

    failed.signal_shutdown();
    drop(failed);
    shared.emit(ClientEvent::Disconnected);

    if shared
        .state
        .compare_exchange(ConnectionState::Connected, ConnectionState::Reconnecting)
        .is_err()
    {
        // stop() won the race
        shared.reconnecting.store(false, Ordering::Release);
        return;
    }

    error!(epoch, "Connection lost: {}. Reconnecting.", error);

    let run = shared.run.load(Ordering::Acquire);
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        if let Err(e) = connect_with_retry(&shared, run, true).await {
            debug!("Reconnect task finished without connection: {}", e);
        }
    });
}
