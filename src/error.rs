//! Errors surfaced by the protocol engine.
//!
//! Decode-level problems (unparseable frames, buffer overflow) never reach a
//! caller; they are logged and recovered inside the decoder. Everything here
//! is tied to a specific call: opening a port or issuing a command.

use crate::port::PortError;
use crate::protocol::RuleError;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for engine operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Unified engine error type.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The port could not be opened. State is back to disconnected.
    #[error("failed to connect to {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: PortError,
    },

    /// A command was issued while no connection was open.
    #[error("device is not connected")]
    NotConnected,

    /// The connection went away while the command was queued or in flight.
    #[error("connection closed before the command completed")]
    Disconnected,

    /// No reply carrying the command's name arrived in time.
    #[error("command {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The device answered with a nonzero status code.
    #[error("command {command} failed: device returned code {code}")]
    Device { command: String, code: i64 },

    /// Arguments rejected before anything was written.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid trigger rule: {0}")]
    InvalidRule(#[from] RuleError),

    /// The reply succeeded but `data` did not have the expected shape.
    #[error("command {command} returned an unexpected payload: {reason}")]
    UnexpectedPayload { command: String, reason: String },

    #[error("transport write failed: {0}")]
    Write(#[from] std::io::Error),
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Device status code, for `Device` errors.
    pub fn device_code(&self) -> Option<i64> {
        match self {
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_command() {
        let err = LinkError::Timeout {
            command: "AT+ID?".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert_eq!(err.to_string(), "command AT+ID? timed out after 100ms");
        assert!(err.is_timeout());

        let err = LinkError::Device {
            command: "AT+MODEL=9".to_string(),
            code: 3,
        };
        assert_eq!(
            err.to_string(),
            "command AT+MODEL=9 failed: device returned code 3"
        );
        assert_eq!(err.device_code(), Some(3));
    }

    #[test]
    fn test_connection_error_keeps_source() {
        use std::error::Error as _;

        let err = LinkError::Connection {
            path: "/dev/ttyACM9".to_string(),
            source: PortError::not_found("/dev/ttyACM9"),
        };
        assert!(err.to_string().starts_with("failed to connect to /dev/ttyACM9"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_rule_error_conversion() {
        let err: LinkError = RuleError::UnknownCondition(9).into();
        assert!(matches!(err, LinkError::InvalidRule(_)));
    }
}
