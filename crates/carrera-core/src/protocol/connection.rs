//! Connection management
//!
//! The byte-stream seam between the protocol and whatever carries it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Result, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};

/// A byte-stream transport to the Control Unit.
///
/// Implementations know nothing about frames or checksums. Methods take
/// `&self` so that [`close`](Connection::close) can be called from another
/// thread while a [`recv`](Connection::recv) is in flight; the blocked call
/// must then return [`ProtocolError::NotConnected`](super::ProtocolError::NotConnected).
pub trait Connection: Send + Sync {
    /// Write the whole buffer, failing on timeout or transport error
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Wait until at least one byte arrives and return up to `max_length`
    /// bytes. An empty buffer means the timeout elapsed without data.
    fn recv(&self, max_length: usize) -> Result<Vec<u8>>;

    /// Release the transport. Calling it more than once is harmless.
    fn close(&self);

    /// Whether [`close`](Connection::close) has been called
    fn is_closed(&self) -> bool;

    /// The configured read timeout
    fn timeout(&self) -> Duration;
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
    /// Sleep between polls of the receive buffer in milliseconds
    pub poll_interval_ms: u64,
}

impl ConnectionConfig {
    /// Default configuration for the given port
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Read/write timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_connection_config_from_json() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"port_name": "/dev/ttyUSB1", "timeout_ms": 300}"#).unwrap();
        assert_eq!(config.port_name, "/dev/ttyUSB1");
        assert_eq!(config.timeout_ms, 300);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let mut config = ConnectionConfig::new("/dev/null");
        config.poll_interval_ms = 0;
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
