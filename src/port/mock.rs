//! Mock serial port implementation for testing.
//!
//! [`MockPortOpener`] hands the engine one end of an in-memory duplex pipe and
//! keeps the other end as a [`MockDevice`], which tests drive to play the
//! firmware: read the AT commands the engine wrote, answer with frames, push
//! telemetry, or hang up.

use super::error::PortError;
use super::traits::{OpenedPort, PortConfiguration, PortOpener};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Capacity of the in-memory pipe; large enough for image-bearing frames.
const MOCK_PIPE_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct MockOpenerState {
    /// Device ends of every pipe opened so far, oldest first.
    devices: VecDeque<MockDevice>,
    /// Paths passed to `open`, in call order.
    opened: Vec<String>,
    /// When set, the next `open` fails as if the port did not exist.
    fail_next: bool,
}

/// Port opener backed by in-memory pipes.
///
/// # Example
/// ```
/// use atlink::port::{MockPortOpener, PortConfiguration, PortOpener};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let opener = MockPortOpener::new();
/// let _port = opener.open("MOCK0", &PortConfiguration::default()).await.unwrap();
/// assert_eq!(opener.opened_paths(), vec!["MOCK0".to_string()]);
/// assert!(opener.take_device().is_some());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPortOpener {
    state: Arc<Mutex<MockOpenerState>>,
}

impl MockPortOpener {
    /// Create an opener with no devices attached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` call fail.
    pub fn fail_next_open(&self) {
        self.state.lock().fail_next = true;
    }

    /// Every path `open` was called with, including failed attempts.
    pub fn opened_paths(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    /// Take the device end of the oldest pipe not yet taken.
    pub fn take_device(&self) -> Option<MockDevice> {
        self.state.lock().devices.pop_front()
    }
}

#[async_trait]
impl PortOpener for MockPortOpener {
    async fn open(
        &self,
        path: &str,
        _config: &PortConfiguration,
    ) -> Result<OpenedPort, PortError> {
        let mut state = self.state.lock();
        state.opened.push(path.to_string());

        if state.fail_next {
            state.fail_next = false;
            return Err(PortError::not_found(path));
        }

        let (engine_end, device_end) = tokio::io::duplex(MOCK_PIPE_CAPACITY);
        state.devices.push_back(MockDevice {
            name: path.to_string(),
            stream: device_end,
            pending: Vec::new(),
        });

        let (reader, writer) = tokio::io::split(engine_end);
        Ok(OpenedPort {
            name: path.to_string(),
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// The firmware side of a mock connection.
#[derive(Debug)]
pub struct MockDevice {
    name: String,
    stream: DuplexStream,
    /// Bytes read from the engine that have not formed a full command yet.
    pending: Vec<u8>,
}

impl MockDevice {
    /// Name of the port this device is attached to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write raw bytes towards the engine.
    pub async fn send_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Write one JSON body using the standard `\r{json}\n` framing.
    pub async fn send_frame(&mut self, body: &str) -> std::io::Result<()> {
        self.send_bytes(format!("\r{body}\n").as_bytes()).await
    }

    /// Answer a command with a `type = 0` reply frame.
    pub async fn reply(&mut self, name: &str, code: i64, data: Value) -> std::io::Result<()> {
        let body = json!({ "type": 0, "name": name, "code": code, "data": data });
        self.send_frame(&body.to_string()).await
    }

    /// Push an unsolicited `type = 1` event frame.
    pub async fn event(&mut self, name: &str, data: Value) -> std::io::Result<()> {
        let body = json!({ "type": 1, "name": name, "code": 0, "data": data });
        self.send_frame(&body.to_string()).await
    }

    /// Read the next CR-terminated command the engine wrote.
    ///
    /// Returns `None` if nothing complete arrives within `timeout` or the
    /// engine closed its end.
    pub async fn read_command(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]);
                return Some(text.trim_start_matches('\n').to_string());
            }

            let mut buf = [0u8; 512];
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await;
            match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                Ok(Ok(n)) => self.pending.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Assert-friendly check that the engine wrote nothing within `window`.
    pub async fn is_silent_for(&mut self, window: Duration) -> bool {
        self.read_command(window).await.is_none()
    }

    /// Drop the device end, which the engine observes as the port closing.
    pub fn hang_up(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_records_paths_and_devices() {
        let opener = MockPortOpener::new();
        opener
            .open("MOCK0", &PortConfiguration::default())
            .await
            .unwrap();
        opener
            .open("MOCK1", &PortConfiguration::default())
            .await
            .unwrap();

        assert_eq!(opener.opened_paths(), vec!["MOCK0", "MOCK1"]);
        assert_eq!(opener.take_device().unwrap().name(), "MOCK0");
        assert_eq!(opener.take_device().unwrap().name(), "MOCK1");
        assert!(opener.take_device().is_none());
    }

    #[tokio::test]
    async fn test_fail_next_open() {
        let opener = MockPortOpener::new();
        opener.fail_next_open();

        let result = opener.open("MOCK0", &PortConfiguration::default()).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));

        // Only the next open fails
        assert!(opener
            .open("MOCK0", &PortConfiguration::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_device_reads_commands_written_by_engine() {
        let opener = MockPortOpener::new();
        let mut port = opener
            .open("MOCK0", &PortConfiguration::default())
            .await
            .unwrap();
        let mut device = opener.take_device().unwrap();

        port.writer.write_all(b"AT+ID?\rAT+NAME?\r").await.unwrap();
        port.writer.flush().await.unwrap();

        let timeout = Duration::from_millis(200);
        assert_eq!(device.read_command(timeout).await.as_deref(), Some("AT+ID?"));
        assert_eq!(device.read_command(timeout).await.as_deref(), Some("AT+NAME?"));
        assert!(device.is_silent_for(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_device_frames_reach_engine() {
        let opener = MockPortOpener::new();
        let mut port = opener
            .open("MOCK0", &PortConfiguration::default())
            .await
            .unwrap();
        let mut device = opener.take_device().unwrap();

        device.send_frame(r#"{"type":0}"#).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = port.reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\r{\"type\":0}\n");
    }

    #[tokio::test]
    async fn test_hang_up_reads_as_eof() {
        let opener = MockPortOpener::new();
        let mut port = opener
            .open("MOCK0", &PortConfiguration::default())
            .await
            .unwrap();
        opener.take_device().unwrap().hang_up();

        let mut buf = [0u8; 8];
        assert_eq!(port.reader.read(&mut buf).await.unwrap(), 0);
    }
}
