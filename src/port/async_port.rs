//! Async serial port implementation using tokio-serial.
//!
//! Note: This module is gated behind the `async-serial` feature flag.

use super::error::PortError;
use super::traits::{OpenedPort, PortConfiguration, PortOpener};
use async_trait::async_trait;
use tracing::debug;

/// Opens real serial ports with native async I/O.
///
/// # Example
/// ```no_run
/// use atlink::port::{PortConfiguration, PortOpener, TokioSerialOpener};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let opener = TokioSerialOpener;
/// let port = opener.open("/dev/ttyACM0", &PortConfiguration::default()).await?;
/// assert_eq!(port.name, "/dev/ttyACM0");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialOpener;

impl TokioSerialOpener {
    fn open_stream(
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<tokio_serial::SerialStream, PortError> {
        let builder = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout);

        tokio_serial::SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => PortError::not_found(port_name),
            tokio_serial::ErrorKind::InvalidInput => PortError::config(e.to_string()),
            _ => PortError::Serial(e),
        })
    }
}

#[async_trait]
impl PortOpener for TokioSerialOpener {
    async fn open(
        &self,
        path: &str,
        config: &PortConfiguration,
    ) -> Result<OpenedPort, PortError> {
        let stream = Self::open_stream(path, config)?;
        debug!(port = path, baud = config.baud_rate, "serial stream opened");

        let (reader, writer) = tokio::io::split(stream);
        Ok(OpenedPort {
            name: path.to_string(),
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}
