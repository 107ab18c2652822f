//! Ping/pong bookkeeping
//!
//! The heartbeat records each ping it sends and the receiver records each
//! pong it reads. The result is reported through metrics only: a missing pong
//! never tears the connection down. Liveness is decided by I/O errors alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Timestamps are stored as `ms since origin + 1` so that 0 means "never"
const NEVER: u64 = 0;

/// Last-ping / last-pong timestamps shared by the heartbeat and receiver
#[derive(Debug)]
pub struct PongTracker {
    origin: Instant,
    last_ping: AtomicU64,
    last_pong: AtomicU64,
    /// A ping without a pong for longer than this reports unhealthy
    grace: Duration,
}

impl PongTracker {
    /// `grace` is usually a small multiple of the heartbeat interval
    pub fn new(grace: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_ping: AtomicU64::new(NEVER),
            last_pong: AtomicU64::new(NEVER),
            grace,
        }
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }

    fn since(&self, stamp: u64) -> Option<Duration> {
        (stamp != NEVER).then(|| Duration::from_millis(self.now().saturating_sub(stamp)))
    }

    pub fn record_ping(&self) {
        self.last_ping.store(self.now(), Ordering::Release);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(self.now(), Ordering::Release);
    }

    /// False only when the latest ping is unanswered for longer than `grace`
    pub fn is_healthy(&self) -> bool {
        let ping = self.last_ping.load(Ordering::Acquire);
        let pong = self.last_pong.load(Ordering::Acquire);

        if ping == NEVER || pong >= ping {
            return true;
        }
        self.now().saturating_sub(ping) < self.grace.as_millis() as u64
    }

    pub fn since_last_ping(&self) -> Option<Duration> {
        self.since(self.last_ping.load(Ordering::Acquire))
    }

    pub fn since_last_pong(&self) -> Option<Duration> {
        self.since(self.last_pong.load(Ordering::Acquire))
    }

    /// Forget both timestamps; called at the start of every connection epoch
    pub fn reset(&self) {
        self.last_ping.store(NEVER, Ordering::Release);
        self.last_pong.store(NEVER, Ordering::Release);
    }
}
