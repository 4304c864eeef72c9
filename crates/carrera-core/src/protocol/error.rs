//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the Control Unit
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{what} out of range: {value} not in {min}..={max}")]
    Validation {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Connection timeout")]
    Timeout,

    #[error("Not connected to control unit")]
    NotConnected,

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn out_of_range(what: &'static str, value: i64, min: i64, max: i64) -> Self {
        ProtocolError::Validation {
            what,
            value,
            min,
            max,
        }
    }

    /// Whether a polling loop may log this error and keep going.
    ///
    /// A single lost or mangled frame must not end a session, so timeouts
    /// and decode failures are transient. A closed transport or a rejected
    /// argument is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout | ProtocolError::Checksum { .. } | ProtocolError::Format(_)
        )
    }
}

/// Result alias used throughout the protocol layer
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = ProtocolError::out_of_range("address", 8, 0, 7);
        assert_eq!(err.to_string(), "address out of range: 8 not in 0..=7");
    }

    #[test]
    fn test_checksum_display() {
        let err = ProtocolError::Checksum {
            expected: 0x37,
            actual: 0x30,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0x37, got 0x30");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProtocolError::Timeout.is_transient());
        assert!(ProtocolError::Format("short".into()).is_transient());
        assert!(ProtocolError::Checksum {
            expected: 0,
            actual: 1
        }
        .is_transient());
        assert!(!ProtocolError::NotConnected.is_transient());
        assert!(!ProtocolError::out_of_range("value", 16, 0, 15).is_transient());
    }
}
