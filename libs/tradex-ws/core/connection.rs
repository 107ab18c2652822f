//! One connection epoch: socket, writer, receiver and heartbeat
//!
//! ```text
//!                    ┌──────────────┐
//! send_message ──┐   │              │
//! heartbeat ─────┼──>│ Writer Task  │──> WriteHalf ──> server
//! receiver ──────┘   │ (mpsc queue) │
//! (pong / close)     └──────────────┘
//!
//! server ──> ReadHalf ──> Receiver Task ──> Dispatcher
//! ```
//!
//! Every epoch gets a fresh socket, a fresh outbound queue and a fresh
//! cancel signal. Tasks of an old epoch can only report faults tagged with
//! their own epoch id, which the failure handler ignores once a newer epoch
//! is current.

use crate::core::client::{self, ClientShared};
use crate::core::config::ClientConfig;
use crate::core::handshake;
use crate::core::heartbeat::heartbeat_task;
use crate::core::receiver::Receiver;
use crate::core::transport::{self, WsStream};
use crate::protocol::error::{Result, TradexWsError};
use crate::protocol::frame::{self, Frame, FrameReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long `close` waits for the Close frame and for the tasks to finish
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Requests handled by the writer task, in FIFO order
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Encode, mask and write a frame; `ack` reports whether the write succeeded
    Frame {
        frame: Frame,
        ack: Option<oneshot::Sender<bool>>,
    },
    /// Shut the write half down and exit
    Shutdown,
}

/// A socket that completed the upgrade handshake
pub(crate) struct Established {
    stream: WsStream,
    /// Bytes received after the response head
    leftover: Vec<u8>,
}

/// Open the socket and run the handshake
pub(crate) async fn establish(config: &ClientConfig) -> Result<Established> {
    let mut stream = transport::open(config).await?;

    match handshake::perform(&mut stream, config).await {
        Ok(leftover) => {
            info!("Connected to {}", config.display_url());
            Ok(Established { stream, leftover })
        }
        Err(e) => {
            let _ = stream.shutdown().await;
            Err(e)
        }
    }
}

/// Handles to the tasks of the current epoch
pub(crate) struct Connection {
    pub(crate) epoch: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Split the socket and spawn the writer, receiver and heartbeat tasks
    pub(crate) fn spawn(
        shared: &Arc<ClientShared>,
        run: u64,
        epoch: u64,
        established: Established,
    ) -> Self {
        let Established { stream, leftover } = established;
        let (read_half, write_half) = tokio::io::split(stream);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let writer = tokio::spawn(writer_task(
            Arc::clone(shared),
            epoch,
            write_half,
            outbound_rx,
        ));

        let reader = FrameReader::with_buffered(read_half, leftover, shared.config.max_message_size);
        let receiver = Receiver::new(
            Arc::clone(shared),
            run,
            epoch,
            reader,
            outbound_tx.clone(),
            cancel_rx.clone(),
        );
        let receiver = tokio::spawn(receiver.run());

        let heartbeat = tokio::spawn(heartbeat_task(
            Arc::clone(shared),
            epoch,
            shared.config.heartbeat_interval,
            outbound_tx.clone(),
            cancel_rx,
        ));

        debug!(epoch, "Connection tasks spawned");

        Self {
            epoch,
            outbound: outbound_tx,
            cancel: cancel_tx,
            tasks: vec![writer, receiver, heartbeat],
        }
    }

    pub(crate) fn outbound(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }

    /// Ask every task of this epoch to stop without waiting for them
    ///
    /// Frames already queued are still written before the write half shuts
    /// down.
    pub(crate) fn signal_shutdown(&self) {
        let _ = self.outbound.send(Outbound::Shutdown);
        let _ = self.cancel.send(true);
    }

    /// Tear the epoch down, optionally sending a Close frame first
    ///
    /// Must not be called from one of this epoch's own tasks.
    pub(crate) async fn close(self, send_close: bool) {
        if send_close {
            let (ack_tx, ack_rx) = oneshot::channel();
            let close = Outbound::Frame {
                frame: Frame::new(frame::Opcode::Close, 1000u16.to_be_bytes().to_vec()),
                ack: Some(ack_tx),
            };
            if self.outbound.send(close).is_ok() {
                match timeout(CLOSE_GRACE, ack_rx).await {
                    Ok(Ok(true)) => debug!(epoch = self.epoch, "Sent close frame"),
                    _ => debug!(epoch = self.epoch, "Close frame not delivered"),
                }
            }
        }

        self.signal_shutdown();

        for mut task in self.tasks {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!(epoch = self.epoch, "Connection task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

/// Sole owner of the write half
///
/// Serializes every outgoing frame. A write error is a transport fault for
/// the epoch and ends the task.
async fn writer_task(
    shared: Arc<ClientShared>,
    epoch: u64,
    mut write: WriteHalf<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(request) = outbound.recv().await {
        match request {
            Outbound::Frame { frame, ack } => {
                let bytes = frame::encode(&frame.payload, frame.opcode);
                let result = async {
                    write.write_all(&bytes).await?;
                    write.flush().await
                }
                .await;

                if result.is_ok() {
                    shared.metrics.increment_sent();
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result.is_ok());
                }

                if let Err(e) = result {
                    warn!(epoch, "Failed to write {:?} frame: {}", frame.opcode, e);
                    client::handle_failure(&shared, epoch, TradexWsError::Io(e));
                    break;
                }
            }
            Outbound::Shutdown => {
                let _ = write.shutdown().await;
                break;
            }
        }
    }

    debug!(epoch, "Writer task exiting");
}
