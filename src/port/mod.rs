//! Port abstraction layer for serial communication.
//!
//! Provides the [`PortOpener`] seam plus a real (tokio-serial) and a mock
//! implementation, enabling dependency injection and hardware-free tests.

pub mod error;
pub mod mock;
pub mod traits;

#[cfg(feature = "async-serial")]
pub mod async_port;

pub use error::PortError;
pub use mock::{MockDevice, MockPortOpener};
pub use traits::*;

#[cfg(feature = "async-serial")]
pub use async_port::TokioSerialOpener;

use serde::Serialize;

/// A serial port visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// System path, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// USB vendor id, when the port is a USB device.
    pub vid: Option<u16>,
    /// USB product id, when the port is a USB device.
    pub pid: Option<u16>,
    /// Manufacturer string reported by the USB descriptor.
    pub manufacturer: Option<String>,
    /// Product string reported by the USB descriptor.
    pub product: Option<String>,
}

/// Enumerate serial ports on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>, PortError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => PortInfo {
                name: port.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => PortInfo {
                name: port.port_name,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
            },
        })
        .collect())
}
