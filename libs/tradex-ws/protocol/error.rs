use thiserror::Error;

/// Main error type for tradex-ws
#[derive(Error, Debug)]
pub enum TradexWsError {
    /// Socket level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS negotiation failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Upgrade handshake rejected or malformed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Frame could not be read or written
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Connection closed unexpectedly
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// No active connection for the requested operation
    #[error("Not connected")]
    NotConnected,

    /// Application payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Registered handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reconnection failed
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: usize, reason: String },

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

/// Errors raised while decoding frames from the wire
///
/// Transport faults end the connection epoch. Protocol anomalies are
/// recoverable: the offending frame is skipped and reading continues.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Underlying stream failed
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream between frames
    #[error("stream closed by peer")]
    Closed,

    /// Stream ended or stalled before a full frame arrived
    #[error("truncated frame: expected {expected} more bytes, stream {reason}")]
    Truncated { expected: usize, reason: &'static str },

    /// Opcode outside the RFC 6455 set
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    /// Declared payload length exceeds the configured maximum
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: usize },

    /// 64-bit length with the most significant bit set
    #[error("invalid payload length: {0}")]
    InvalidLength(u64),
}

impl FrameError {
    /// Whether reading can continue on the same stream after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidOpcode(_) | FrameError::PayloadTooLarge { .. }
        )
    }
}

/// Result type for tradex-ws operations
pub type Result<T> = std::result::Result<T, TradexWsError>;
