//! Configuration schema definitions.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) is a valid configuration.

use super::error::{ConfigError, ConfigResult};
use crate::port::{DataBits, FlowControl, Parity, StopBits, DEFAULT_BAUD_RATE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line and command settings
    pub serial: SerialConfig,
    /// Frame decoding and channel sizing
    pub protocol: ProtocolConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation("serial.default_baud", "must be nonzero"));
        }
        if self.serial.command_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.command_timeout_ms",
                "must be nonzero",
            ));
        }

        let protocol = &self.protocol;
        for (key, value) in [
            ("protocol.max_buffer_bytes", protocol.max_buffer_bytes),
            ("protocol.frame_channel_capacity", protocol.frame_channel_capacity),
            ("protocol.traffic_channel_capacity", protocol.traffic_channel_capacity),
            ("protocol.command_queue_depth", protocol.command_queue_depth),
            ("protocol.read_chunk_size", protocol.read_chunk_size),
        ] {
            if value == 0 {
                return Err(ConfigError::validation(key, "must be nonzero"));
            }
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used when none is given on the command line
    pub default_port: Option<String>,
    /// Default baud rate for new connections
    pub default_baud: u32,
    /// How long a command waits for its reply
    pub command_timeout_ms: u64,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_port: None,
            default_baud: DEFAULT_BAUD_RATE,
            command_timeout_ms: 3000,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Get the command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Protocol engine sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Receive buffer size above which a buffer with no `{` is discarded
    pub max_buffer_bytes: usize,
    /// Frames a slow subscriber may fall behind before skipping
    pub frame_channel_capacity: usize,
    /// Traffic records a slow monitor may fall behind before skipping
    pub traffic_channel_capacity: usize,
    /// Commands that may wait behind the one in flight
    pub command_queue_depth: usize,
    /// Size of each read from the port
    pub read_chunk_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 512_000,
            frame_channel_capacity: 256,
            traffic_channel_capacity: 256,
            command_queue_depth: 32,
            read_chunk_size: 4096,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "pretty", "compact", "full"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// The subscriber's default layout
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.default_baud, 921_600);
        assert_eq!(config.serial.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.protocol.max_buffer_bytes, 512_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_aliases_table() {
        let config: Config = toml::from_str(
            r#"
            [serial.port_aliases]
            grove = "/dev/ttyACM0"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.serial.port_aliases.get("grove").map(String::as_str),
            Some("/dev/ttyACM0")
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[protocol]"));
        assert!(toml_str.contains("[logging]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            default_baud = 115200
            parity = "even"

            [logging]
            format = "compact"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.default_baud, 115200);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.logging.format, LogFormat::Compact);
        // Defaults should still work
        assert_eq!(config.serial.command_timeout_ms, 3000);
        assert_eq!(config.protocol.command_queue_depth, 32);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = Config::default();
        config.protocol.frame_channel_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("protocol.frame_channel_capacity"));

        let mut config = Config::default();
        config.serial.command_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
