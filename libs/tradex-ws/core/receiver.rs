//! Receive loop for one connection epoch
//!
//! Reads frames, answers pings, reassembles fragments and hands complete
//! messages to the dispatcher. The read is raced against the poll interval
//! so a stop request is noticed even when the server is silent.

use crate::core::client::{self, ClientShared};
use crate::core::connection::Outbound;
use crate::core::transport::WsStream;
use crate::protocol::error::{FrameError, TradexWsError};
use crate::protocol::event::Event;
use crate::protocol::frame::{Frame, FrameReader, Message, MessageAssembler, Opcode};
use std::sync::Arc;
use tokio::io::ReadHalf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

const PREVIEW_CHARS: usize = 100;

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Receiver {
    shared: Arc<ClientShared>,
    /// `start()` generation this epoch belongs to; dispatch is gated on it
    run: u64,
    epoch: u64,
    reader: FrameReader<ReadHalf<WsStream>>,
    assembler: MessageAssembler,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: watch::Receiver<bool>,
}

impl Receiver {
    pub(crate) fn new(
        shared: Arc<ClientShared>,
        run: u64,
        epoch: u64,
        reader: FrameReader<ReadHalf<WsStream>>,
        outbound: mpsc::UnboundedSender<Outbound>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let assembler = MessageAssembler::new(shared.config.max_message_size);
        Self {
            shared,
            run,
            epoch,
            reader,
            assembler,
            outbound,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let poll_interval = self.shared.config.poll_interval;
        let read_timeout = self.shared.config.read_timeout;
        let mut stalled_since: Option<Instant> = None;
        let mut progress = self.reader.bytes_read();

        loop {
            if !self.shared.is_running() {
                break;
            }

            let read = tokio::select! {
                _ = self.cancel.changed() => break,
                read = timeout(poll_interval, self.reader.read_frame()) => read,
            };

            let frame = match read {
                Err(_) => {
                    // Nothing complete yet; a partial frame may only stall so long
                    if self.reader.bytes_read() != progress {
                        progress = self.reader.bytes_read();
                        stalled_since = None;
                    }
                    if self.reader.has_partial() {
                        let since = *stalled_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= read_timeout {
                            let fault = FrameError::Truncated {
                                expected: self.reader.missing(),
                                reason: "timed out",
                            };
                            self.report(fault.into());
                            break;
                        }
                    } else {
                        stalled_since = None;
                    }
                    continue;
                }
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) if e.is_recoverable() => {
                    warn!(epoch = self.epoch, "Skipping frame: {}", e);
                    self.assembler.reset();
                    continue;
                }
                Ok(Err(e)) => {
                    self.report(e.into());
                    break;
                }
            };

            stalled_since = None;
            if let Flow::Stop = self.handle_frame(frame).await {
                break;
            }
        }

        info!(epoch = self.epoch, "Receiver task terminated");
    }

    async fn handle_frame(&mut self, frame: Frame) -> Flow {
        match frame.opcode {
            Opcode::Close => {
                info!(epoch = self.epoch, "WebSocket connection closed by server");
                let _ = self.outbound.send(Outbound::Frame {
                    frame: Frame::close(),
                    ack: None,
                });
                self.report(TradexWsError::ConnectionClosed("close frame from server".into()));
                Flow::Stop
            }
            Opcode::Ping => {
                // Wait for the pong to hit the socket before reading on
                let (ack_tx, ack_rx) = oneshot::channel();
                let pong = Outbound::Frame {
                    frame: Frame::pong(frame.payload),
                    ack: Some(ack_tx),
                };
                if self.outbound.send(pong).is_err() || !matches!(ack_rx.await, Ok(true)) {
                    // The writer reports its own failure
                    return Flow::Stop;
                }
                debug!(epoch = self.epoch, "[PONG] Replied to server ping");
                Flow::Continue
            }
            Opcode::Pong => {
                self.shared.pong_tracker.record_pong();
                self.shared.metrics.increment_pongs();
                debug!(epoch = self.epoch, "[PONG] Received");
                Flow::Continue
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if let Some(message) = self.assembler.push(frame) {
                    self.deliver(message);
                }
                Flow::Continue
            }
        }
    }

    fn deliver(&self, message: Message) {
        self.shared.metrics.increment_received();

        let event = match Event::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                let text = String::from_utf8_lossy(&message.payload);
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                warn!(epoch = self.epoch, "Dropping message: {} ({})", e, preview);
                return;
            }
        };

        if !self.shared.is_running() {
            return;
        }

        debug!(epoch = self.epoch, event_type = %event.event_type(), "Received event");
        if self
            .shared
            .dispatcher
            .dispatch_gated(event, self.shared.run_gate(self.run))
            .is_some()
        {
            self.shared.metrics.increment_dispatched();
        }
    }

    fn report(&self, error: TradexWsError) {
        if self.shared.is_running() {
            warn!(epoch = self.epoch, "Connection problem: {}", error);
        }
        client::handle_failure(&self.shared, self.epoch, error);
    }
}
