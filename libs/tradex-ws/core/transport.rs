//! TCP connect and TLS wrapping

use crate::core::config::ClientConfig;
use crate::protocol::error::{Result, TradexWsError};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::MaybeTlsStream;
use tracing::debug;

/// Socket type used for every connection epoch
pub type WsStream = MaybeTlsStream<TcpStream>;

/// Open a TCP connection and, when configured, wrap it in TLS
///
/// The hostname from the configuration is used for certificate validation.
/// Connect and TLS negotiation share `connect_timeout`.
pub async fn open(config: &ClientConfig) -> Result<WsStream> {
    let connect = async {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;

        if !config.use_tls {
            debug!("Connected to {}:{} (plain)", config.host, config.port);
            return Ok(MaybeTlsStream::Plain(tcp));
        }

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| TradexWsError::Tls(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector
            .connect(&config.host, tcp)
            .await
            .map_err(|e| TradexWsError::Tls(e.to_string()))?;

        debug!("Connected to {}:{} (TLS)", config.host, config.port);
        Ok(MaybeTlsStream::NativeTls(tls))
    };

    timeout(config.connect_timeout, connect)
        .await
        .map_err(|_| {
            TradexWsError::Timeout(format!(
                "connect to {}:{} exceeded {:?}",
                config.host, config.port, config.connect_timeout
            ))
        })?
}
