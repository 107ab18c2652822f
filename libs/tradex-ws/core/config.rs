use crate::protocol::error::{Result, TradexWsError};
use crate::protocol::frame::DEFAULT_MAX_MESSAGE_SIZE;
use crate::protocol::reconnect::{millis, ReconnectPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for [`TradexWsClient`](crate::core::client::TradexWsClient)
///
/// Every tunable has a default, so a YAML document only needs `host`.
/// The token and client id are never read from configuration files; they are
/// handed over by the login layer through [`ClientConfig::with_credentials`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server hostname, also used for TLS certificate validation
    pub host: String,

    pub port: u16,

    /// Request path of the upgrade request
    pub path: String,

    /// Wrap the socket in TLS (disable only for local test servers)
    pub use_tls: bool,

    /// Authentication token (query parameter `token`)
    #[serde(skip)]
    pub token: String,

    /// Client identifier (query parameter `clientID`)
    #[serde(skip)]
    pub client_id: String,

    pub reconnect: ReconnectPolicy,

    /// Interval between ping frames
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,

    /// Bound on the TCP connect plus TLS negotiation
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// Deadline for the handshake response headers
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,

    /// How often the receiver wakes up to check for a stop request
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// How long a partially received frame may stall before the connection
    /// is considered broken
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Duration,

    /// Largest accepted frame payload and reassembled message
    pub max_message_size: usize,
}

impl ClientConfig {
    /// Create a configuration for `host:port` with default tunables
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the token and client id produced by login
    pub fn with_credentials(mut self, token: impl Into<String>, client_id: impl Into<String>) -> Self {
        self.token = token.into();
        self.client_id = client_id.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Check the configuration before any connection attempt
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TradexWsError::Configuration("host must not be empty".into()));
        }
        if !self.path.starts_with('/') {
            return Err(TradexWsError::Configuration(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        for (name, value) in [
            ("host", &self.host),
            ("path", &self.path),
            ("token", &self.token),
            ("client_id", &self.client_id),
        ] {
            if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(TradexWsError::Configuration(format!(
                    "{} contains whitespace or control characters",
                    name
                )));
            }
        }

        let policy = &self.reconnect;
        if policy.max_attempts == 0 {
            return Err(TradexWsError::Configuration(
                "reconnect.max_attempts must be at least 1".into(),
            ));
        }
        if policy.backoff_factor.is_nan() || policy.backoff_factor < 1.0 {
            return Err(TradexWsError::Configuration(format!(
                "reconnect.backoff_factor must be >= 1.0, got {}",
                policy.backoff_factor
            )));
        }
        if policy.max_delay < policy.initial_delay {
            return Err(TradexWsError::Configuration(
                "reconnect.max_delay must not be below reconnect.initial_delay".into(),
            ));
        }

        if self.heartbeat_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(TradexWsError::Configuration(
                "heartbeat and poll intervals must be non-zero".into(),
            ));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                return Err(TradexWsError::Configuration(format!(
                    "{} must be non-zero",
                    name
                )));
            }
        }
        if self.max_message_size == 0 {
            return Err(TradexWsError::Configuration(
                "max_message_size must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// `ws(s)://host:port/path` without credentials, for logging
    pub fn display_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            path: "/".to_string(),
            use_tls: true,
            token: String::new(),
            client_id: String::new(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(30),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("ws.example.com", 8443);
        assert_eq!(config.port, 8443);
        assert_eq!(config.path, "/");
        assert!(config.use_tls);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.display_url(), "wss://ws.example.com:8443/");
    }

    #[test]
    fn test_deserialize_partial_document() {
        let json = r#"{
            "host": "ws.example.com",
            "use_tls": false,
            "heartbeat_interval_ms": 5000,
            "reconnect": {"max_attempts": 3, "initial_delay_ms": 250}
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.host, "ws.example.com");
        assert_eq!(config.port, 443);
        assert!(!config.use_tls);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert!(config.token.is_empty());
    }

    #[test]
    fn test_validate_accepts_defaults_with_host() {
        let config = ClientConfig::new("ws.example.com", 443).with_credentials("tok.en-1", "C001");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new("", 443).validate().is_err());
        assert!(ClientConfig::new("h", 443).with_path("ws").validate().is_err());
        assert!(ClientConfig::new("h", 443)
            .with_credentials("bad token", "C001")
            .validate()
            .is_err());
        assert!(ClientConfig::new("h", 443)
            .with_credentials("t", "C001\r\nX-Injected: 1")
            .validate()
            .is_err());
        assert!(ClientConfig::new("h", 443)
            .with_reconnect(ReconnectPolicy::fixed(0, Duration::from_secs(1)))
            .validate()
            .is_err());
        assert!(ClientConfig::new("h", 443)
            .with_reconnect(ReconnectPolicy::new(
                3,
                Duration::from_secs(10),
                2.0,
                Duration::from_secs(1)
            ))
            .validate()
            .is_err());
        assert!(ClientConfig::new("h", 443)
            .with_reconnect(ReconnectPolicy::new(
                3,
                Duration::from_secs(1),
                0.5,
                Duration::from_secs(10)
            ))
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let base = || ClientConfig::new("h", 443).with_credentials("t", "C001");
        assert!(base().validate().is_ok());

        for config in [
            base().with_connect_timeout(Duration::ZERO),
            base().with_handshake_timeout(Duration::ZERO),
            base().with_read_timeout(Duration::ZERO),
        ] {
            assert!(matches!(
                config.validate(),
                Err(TradexWsError::Configuration(msg)) if msg.ends_with("must be non-zero")
            ));
        }
    }
}
