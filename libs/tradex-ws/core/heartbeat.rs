//! Heartbeat for one connection epoch
//!
//! ```text
//! ┌─────────────────────┐
//! │  Heartbeat Task     │
//! │                     │
//! │  Every interval:    │
//! │  1. Wait for tick   │
//! │  2. Queue Ping  ────┼──> outbound channel ──> Writer Task ──> socket
//! │  3. Repeat          │
//! └─────────────────────┘
//! ```
//!
//! The ping goes through the same writer as every other frame, so it can
//! never interleave with a send in progress. A failed write is reported by
//! the writer; the heartbeat only stops when the epoch is torn down.

use crate::core::client::ClientShared;
use crate::core::connection::Outbound;
use crate::protocol::frame::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub(crate) async fn heartbeat_task(
    shared: Arc<ClientShared>,
    epoch: u64,
    interval: Duration,
    outbound: mpsc::UnboundedSender<Outbound>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick - wait for the first interval
    ticker.tick().await;
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(epoch, "Heartbeat task started with interval: {:?}", interval);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                debug!(epoch, "Heartbeat task received shutdown signal");
                break;
            }
            _ = ticker.tick() => {}
        }

        if !shared.is_running() {
            break;
        }

        let ping = Outbound::Frame {
            frame: Frame::ping(Vec::new()),
            ack: None,
        };
        if outbound.send(ping).is_err() {
            debug!(epoch, "Outbound channel closed, shutting down heartbeat task");
            break;
        }

        shared.pong_tracker.record_ping();
        shared.metrics.increment_pings();
        debug!(epoch, "[PING] Sent heartbeat");
    }

    debug!(epoch, "Heartbeat task exiting");
}
