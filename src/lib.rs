//! atlink library
//!
//! Client side of the AT-command protocol spoken by serial vision-AI boards.
//! Commands go out as `AT+<NAME>[=<args>]\r`; the device answers with JSON
//! frames `\r{"type":..,"name":..,"code":..,"data":..}\n`, and streams
//! unsolicited inference results on the same line.
//!
//! # Modules
//!
//! - `port`: Port abstraction (real tokio-serial ports and an in-memory mock)
//! - `protocol`: Command encoding, frame decoding and trigger rules
//! - `link`: Connection lifecycle, command queue and frame fan-out
//! - `device`: Typed wrappers for the device's command set
//! - `config`: Configuration management with TOML support
//! - `logging`: `tracing` subscriber setup
//! - `error`: Engine error type
//!
//! # Example
//!
//! ```rust,no_run
//! use atlink::{DeviceLink, LinkSettings};
//!
//! # async fn run() -> Result<(), atlink::LinkError> {
//! let link = DeviceLink::serial(LinkSettings::default());
//! link.connect("/dev/ttyACM0", 921_600).await?;
//! println!("device id: {}", link.device_id().await?);
//! link.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod logging;
pub mod port;
pub mod protocol;

// Re-export commonly used types for convenience
pub use device::{InvokeOptions, ModelInfo, SensorInfo, VersionInfo};
pub use error::{LinkError, LinkResult};
pub use link::{
    ConnectionState, DeviceLink, Direction, FrameEvent, LinkSettings, Subscription,
    SubscriptionHandle, TrafficRecord, DEFAULT_COMMAND_TIMEOUT,
};
pub use port::{MockDevice, MockPortOpener, PortConfiguration, PortError, PortOpener};
pub use protocol::{Condition, Frame, FrameKind, InvokeResult, TriggerRule};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
