//! HTTP Upgrade handshake
//!
//! ```text
//! client                                        server
//!   │ GET /?token=..&clientID=.. HTTP/1.1          │
//!   │ Upgrade: websocket                           │
//!   │ Sec-WebSocket-Key: base64(16 random bytes)   │
//!   │ ───────────────────────────────────────────> │
//!   │                HTTP/1.1 101 Switching ...    │
//!   │   Sec-WebSocket-Accept: base64(sha1(key+GUID))│
//!   │ <─────────────────────────────────────────── │
//! ```

use crate::core::config::ClientConfig;
use crate::protocol::error::{Result, TradexWsError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Fixed GUID appended to the client key (RFC 6455 section 1.3)
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Random 16-byte nonce, base64-encoded
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// Accept value the server must echo for `key`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the upgrade request; credentials travel as query parameters
pub fn build_request(config: &ClientConfig, key: &str) -> String {
    let separator = if config.path.contains('?') { '&' } else { '?' };
    format!(
        "GET {path}{sep}token={token}&clientID={client_id} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Origin: http://{host}\r\n\
         \r\n",
        path = config.path,
        sep = separator,
        token = config.token,
        client_id = config.client_id,
        host = config.host,
        port = config.port,
        key = key,
    )
}

/// Check the response head (status line and headers, without the body)
pub fn validate_response(head: &str, key: &str) -> Result<()> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(TradexWsError::Handshake(format!(
            "unexpected status line: {}",
            status_line
        )));
    }

    let accept = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| TradexWsError::Handshake("missing Sec-WebSocket-Accept header".into()))?;

    let expected = accept_key(key);
    if !accept.eq_ignore_ascii_case(&expected) {
        return Err(TradexWsError::Handshake(format!(
            "accept key mismatch: expected {}, got {}",
            expected, accept
        )));
    }

    Ok(())
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Run the handshake over an established stream
///
/// Returns any bytes the server sent after the response head; they belong to
/// the first frame(s) and must seed the frame reader.
pub async fn perform<S>(stream: &mut S, config: &ClientConfig) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = build_request(config, &key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    debug!("Sent upgrade request to {}", config.display_url());

    let deadline = Instant::now() + config.handshake_timeout;
    let mut response = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find_terminator(&response) {
            break pos;
        }
        if response.len() > MAX_RESPONSE_HEAD {
            return Err(TradexWsError::Handshake(format!(
                "response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            )));
        }

        let n = match timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) if response.is_empty() => {
                return Err(TradexWsError::Timeout(format!(
                    "no handshake response within {:?}",
                    config.handshake_timeout
                )));
            }
            Err(_) => {
                return Err(TradexWsError::Handshake(format!(
                    "incomplete response head after {:?}: {}",
                    config.handshake_timeout,
                    String::from_utf8_lossy(&response)
                )));
            }
        };

        if n == 0 {
            if response.is_empty() {
                return Err(TradexWsError::ConnectionClosed(
                    "no handshake response received".into(),
                ));
            }
            return Err(TradexWsError::Handshake(format!(
                "connection closed mid-response: {}",
                String::from_utf8_lossy(&response)
            )));
        }
        response.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&response[..head_end]).into_owned();
    if let Err(e) = validate_response(&head, &key) {
        warn!("Server response:\n{}", head);
        return Err(e);
    }

    Ok(response.split_off(head_end + HEADER_TERMINATOR.len()))
}
