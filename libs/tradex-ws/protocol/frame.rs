//! WebSocket frame codec (RFC 6455 subset)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Outbound frames are always masked. Inbound frames are unmasked when the
//! peer set a key, even though servers are not supposed to.

use crate::protocol::error::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Default upper bound for a single frame payload and a reassembled message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const READ_CHUNK: usize = 8 * 1024;

/// WebSocket frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of the first header byte
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }

    /// Close, Ping and Pong
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single frame as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Unfragmented frame with the given opcode
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame without status code
    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }

    /// Set the FIN flag (false opens or continues a fragmented message)
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }
}

/// XOR the payload with the 4-byte key, cycling through the key
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encode a client frame: FIN set, masked with a fresh random key
pub fn encode(payload: &[u8], opcode: Opcode) -> Vec<u8> {
    let key: [u8; 4] = rand::random();
    encode_frame(
        &Frame {
            fin: true,
            opcode,
            masked: true,
            payload: payload.to_vec(),
        },
        Some(key),
    )
}

/// Encode an arbitrary frame
///
/// With `mask_key` the mask bit is set and the payload is XORed with the key;
/// without it the payload is written as-is (server role, used by test peers).
pub fn encode_frame(frame: &Frame, mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let len = frame.payload.len();
    let mut out = Vec::with_capacity(len + 14);

    let mut first = frame.opcode.as_u8();
    if frame.fin {
        first |= FIN_BIT;
    }
    out.push(first);

    let mask_flag = if mask_key.is_some() { MASK_BIT } else { 0 };
    if len < 126 {
        out.push(mask_flag | len as u8);
    } else if len < 65_536 {
        out.push(mask_flag | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_flag | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask_key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(&frame.payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(&frame.payload),
    }

    out
}

/// Outcome of parsing the front of a byte buffer
#[derive(Debug)]
enum Parsed {
    /// A full frame and the number of bytes it occupied
    Frame(Frame, usize),
    /// At least this many more bytes are required
    Incomplete(usize),
    /// Header is complete but the frame must be dropped; its payload is skipped
    Discard {
        header_len: usize,
        payload_len: u64,
        reason: FrameError,
    },
}

fn parse(buf: &[u8], max_payload: usize) -> Result<Parsed, FrameError> {
    if buf.len() < 2 {
        return Ok(Parsed::Incomplete(2 - buf.len()));
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode_raw = buf[0] & 0x0F;
    let masked = buf[1] & MASK_BIT != 0;
    let base_len = buf[1] & 0x7F;

    let ext_len = match base_len {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let mask_len = if masked { 4 } else { 0 };
    let header_len = 2 + ext_len + mask_len;
    if buf.len() < header_len {
        return Ok(Parsed::Incomplete(header_len - buf.len()));
    }

    let payload_len = match ext_len {
        2 => u64::from(u16::from_be_bytes([buf[2], buf[3]])),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(FrameError::InvalidLength(len));
            }
            len
        }
        _ => u64::from(base_len),
    };

    let opcode = match Opcode::from_u8(opcode_raw) {
        Ok(op) => op,
        Err(reason) => {
            return Ok(Parsed::Discard {
                header_len,
                payload_len,
                reason,
            })
        }
    };

    if payload_len > max_payload as u64 {
        return Ok(Parsed::Discard {
            header_len,
            payload_len,
            reason: FrameError::PayloadTooLarge {
                size: payload_len,
                max: max_payload,
            },
        });
    }

    let total = header_len + payload_len as usize;
    if buf.len() < total {
        return Ok(Parsed::Incomplete(total - buf.len()));
    }

    let mut payload = buf[header_len..total].to_vec();
    if masked {
        let key_start = 2 + ext_len;
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[key_start..key_start + 4]);
        apply_mask(&mut payload, key);
    }

    Ok(Parsed::Frame(
        Frame {
            fin,
            opcode,
            masked,
            payload,
        },
        total,
    ))
}

/// Buffered frame reader over the read half of a socket
///
/// `read_frame` is cancel safe: bytes already pulled off the socket stay in
/// the internal buffer, so it can be raced against a timeout or a stop signal
/// without losing frame boundaries.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_payload: usize,
    /// Bytes of a discarded frame still to drop from the stream
    skip: u64,
    /// Bytes still missing for the frame at the front of the buffer
    missing: usize,
    /// Total bytes pulled off the socket
    bytes_read: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, max_payload: usize) -> Self {
        Self::with_buffered(inner, Vec::new(), max_payload)
    }

    /// Start with bytes already read from the stream (e.g. after the handshake)
    pub fn with_buffered(inner: R, buffered: Vec<u8>, max_payload: usize) -> Self {
        Self {
            inner,
            buf: buffered,
            max_payload,
            skip: 0,
            missing: 0,
            bytes_read: 0,
        }
    }

    /// True while a frame has started arriving but is not complete
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty() || self.skip > 0
    }

    /// Total bytes read from the stream so far; grows while a frame trickles in
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes still required to complete the frame in progress
    pub fn missing(&self) -> usize {
        if self.skip > 0 {
            self.skip.min(usize::MAX as u64) as usize
        } else {
            self.missing
        }
    }

    /// Read the next complete frame
    ///
    /// Recoverable errors (see [`FrameError::is_recoverable`]) leave the reader
    /// positioned after the offending frame.
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(self.buf.len() as u64) as usize;
                self.buf.drain(..n);
                self.skip -= n as u64;
            }

            if self.skip == 0 {
                match parse(&self.buf, self.max_payload)? {
                    Parsed::Frame(frame, consumed) => {
                        self.buf.drain(..consumed);
                        self.missing = 0;
                        return Ok(frame);
                    }
                    Parsed::Incomplete(missing) => {
                        self.missing = missing;
                    }
                    Parsed::Discard {
                        header_len,
                        payload_len,
                        reason,
                    } => {
                        self.buf.drain(..header_len);
                        self.skip = payload_len;
                        self.missing = 0;
                        return Err(reason);
                    }
                }
            }

            self.buf.reserve(self.missing.max(READ_CHUNK));

            let n = self.inner.read_buf(&mut self.buf).await?;
            self.bytes_read += n as u64;
            if n == 0 {
                return Err(if self.has_partial() {
                    FrameError::Truncated {
                        expected: self.missing(),
                        reason: "closed",
                    }
                } else {
                    FrameError::Closed
                });
            }
        }
    }
}

/// A reassembled application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Text or Binary
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Reassembles fragmented data frames into messages
///
/// Control frames are not handled here; the receiver routes them before
/// data frames reach the assembler.
#[derive(Debug)]
pub struct MessageAssembler {
    pending: Option<(Opcode, Vec<u8>)>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            max_message_size,
        }
    }

    /// True while a fragmented message is open
    pub fn is_fragmented(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one data frame, returning a message once its final fragment arrives
    pub fn push(&mut self, frame: Frame) -> Option<Message> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if let Some((_, partial)) = self.pending.take() {
                    warn!(
                        discarded = partial.len(),
                        "New {:?} frame while a fragmented message was open, restarting",
                        frame.opcode
                    );
                }

                if frame.fin {
                    Some(Message {
                        opcode: frame.opcode,
                        payload: frame.payload,
                    })
                } else {
                    self.pending = Some((frame.opcode, frame.payload));
                    None
                }
            }
            Opcode::Continuation => {
                let Some((opcode, mut payload)) = self.pending.take() else {
                    warn!(
                        len = frame.payload.len(),
                        "Continuation frame without an open message, dropping"
                    );
                    return None;
                };

                if payload.len() + frame.payload.len() > self.max_message_size {
                    warn!(
                        size = payload.len() + frame.payload.len(),
                        max = self.max_message_size,
                        "Fragmented message exceeds size limit, discarding"
                    );
                    return None;
                }

                payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    Some(Message { opcode, payload })
                } else {
                    self.pending = Some((opcode, payload));
                    None
                }
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => None,
        }
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}
