//! TOML configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the first of these that exists:
//!
//! 1. `ATLINK_CONFIG` environment variable (explicit path)
//! 2. `./atlink.toml` (current directory)
//! 3. `atlink.toml` in the platform config directory
//!    (`~/.config/atlink/` on Linux, `%APPDATA%\atlink\config\` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `ATLINK_<SECTION>_<KEY>`, for example:
//! - `ATLINK_SERIAL_DEFAULT_PORT=/dev/ttyACM0`
//! - `ATLINK_SERIAL_DEFAULT_BAUD=115200`
//! - `ATLINK_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use atlink::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("Default baud: {}", loader.config().serial.default_baud);
//! # Ok::<(), atlink::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, ProtocolConfig, SerialConfig};
