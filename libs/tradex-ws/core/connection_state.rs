//! Lock-free connection state and counters

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Connection lifecycle state
///
/// ```text
/// Disconnected ──start──> Connecting ──ok──> Connected ──fault──> Reconnecting
///      ^                      │                                     │     │
///      └──────exhausted───────┘<────────────exhausted───────────────┘     │
///                                             Connected <──────ok─────────┘
/// any ──stop──> Closing ──teardown──> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Closing = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Connection state shared between the client and its tasks
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition only if the current state is `current`
    ///
    /// Returns the observed state on failure.
    pub fn compare_exchange(
        &self,
        current: ConnectionState,
        new: ConnectionState,
    ) -> Result<ConnectionState, ConnectionState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(ConnectionState::from_u8)
            .map_err(ConnectionState::from_u8)
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Connecting or Reconnecting
    #[inline]
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.get(),
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.get() == ConnectionState::Disconnected
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.get() == ConnectionState::Closing
    }
}

/// Atomic counters updated from the connection tasks
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    frames_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dispatched: AtomicU64,
    reconnect_count: AtomicU64,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_pings(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_pongs(&self) {
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_dispatched(&self) -> u64 {
        self.messages_dispatched.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }

    pub fn pongs_received(&self) -> u64 {
        self.pongs_received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_every_state() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        for s in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Closing,
            ConnectionState::Disconnected,
        ] {
            state.set(s);
            assert_eq!(state.get(), s);
        }
    }

    #[test]
    fn test_compare_exchange_reports_observed_state() {
        let state = AtomicConnectionState::new(ConnectionState::Connected);
        assert_eq!(
            state.compare_exchange(ConnectionState::Disconnected, ConnectionState::Connecting),
            Err(ConnectionState::Connected)
        );
        assert_eq!(
            state.compare_exchange(ConnectionState::Connected, ConnectionState::Reconnecting),
            Ok(ConnectionState::Connected)
        );
        assert!(state.is_connecting());
    }
}
