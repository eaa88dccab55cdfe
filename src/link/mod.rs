//! The device link: connection lifecycle, command issuance and frame fan-out.
//!
//! A [`DeviceLink`] is owned by the application and shared through an `Arc`.
//! Frame and traffic subscriptions live on the link itself, so they keep
//! working across disconnects and reconnects.

pub mod bus;
pub(crate) mod correlator;
pub mod transport;

pub use bus::{Direction, FrameBus, FrameEvent, Subscription, SubscriptionHandle, TrafficRecord};
pub use transport::ConnectionState;

use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::port::{PortConfiguration, PortOpener};
use crate::protocol::{extract_command_name, Frame, DEFAULT_MAX_BUFFER_BYTES};
use correlator::PendingCommand;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};
use transport::Connection;

/// Timeout applied by [`DeviceLink::send_command`].
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3000);

/// Tunables for a [`DeviceLink`].
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Line settings; the baud rate is overridden per `connect` call.
    pub port: PortConfiguration,
    pub command_timeout: Duration,
    pub max_buffer_bytes: usize,
    pub frame_channel_capacity: usize,
    pub traffic_channel_capacity: usize,
    pub command_queue_depth: usize,
    pub read_chunk_size: usize,
    /// Short names resolved to real port paths on `connect`.
    pub port_aliases: HashMap<String, String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: PortConfiguration::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            frame_channel_capacity: 256,
            traffic_channel_capacity: 256,
            command_queue_depth: 32,
            read_chunk_size: 4096,
            port_aliases: HashMap::new(),
        }
    }
}

impl LinkSettings {
    pub fn from_config(config: &Config) -> Self {
        let serial = &config.serial;
        let protocol = &config.protocol;
        Self {
            port: PortConfiguration {
                baud_rate: serial.default_baud,
                data_bits: serial.data_bits,
                flow_control: serial.flow_control,
                parity: serial.parity,
                stop_bits: serial.stop_bits,
                ..PortConfiguration::default()
            },
            command_timeout: serial.command_timeout(),
            max_buffer_bytes: protocol.max_buffer_bytes,
            frame_channel_capacity: protocol.frame_channel_capacity,
            traffic_channel_capacity: protocol.traffic_channel_capacity,
            command_queue_depth: protocol.command_queue_depth,
            read_chunk_size: protocol.read_chunk_size,
            port_aliases: serial.port_aliases.clone(),
        }
    }

    /// Resolve a port name through aliases.
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Client for one device.
pub struct DeviceLink {
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    bus: FrameBus,
    traffic: broadcast::Sender<TrafficRecord>,
    connection: Mutex<Option<Connection>>,
    invoke: parking_lot::Mutex<InvokeSlot>,
}

/// The running telemetry subscription, tagged so a caller can remove only
/// the one it installed.
#[derive(Default)]
struct InvokeSlot {
    generation: u64,
    handle: Option<SubscriptionHandle>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("opener", &self.opener)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DeviceLink {
    pub fn new(opener: Arc<dyn PortOpener>) -> Self {
        Self::with_settings(opener, LinkSettings::default())
    }

    pub fn with_settings(opener: Arc<dyn PortOpener>, settings: LinkSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (traffic, _) = broadcast::channel(settings.traffic_channel_capacity.max(1));
        Self {
            opener,
            bus: FrameBus::new(settings.frame_channel_capacity),
            settings,
            state: Arc::new(state),
            traffic,
            connection: Mutex::new(None),
            invoke: parking_lot::Mutex::new(InvokeSlot::default()),
        }
    }

    /// A link that opens real serial ports.
    #[cfg(feature = "async-serial")]
    pub fn serial(settings: LinkSettings) -> Self {
        Self::with_settings(Arc::new(crate::port::TokioSerialOpener), settings)
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Open `path` at `baud_rate`.
    ///
    /// Connecting to the port already open is a no-op. Connecting elsewhere
    /// tears the current connection down first, rejecting its queued commands.
    pub async fn connect(&self, path: &str, baud_rate: u32) -> LinkResult<()> {
        let path = self.settings.resolve_port(path);
        let mut slot = self.connection.lock().await;

        if let Some(current) = slot.as_ref() {
            if current.path() == path && !current.is_closed() {
                debug!(path = %path, "already connected");
                return Ok(());
            }
        }

        if let Some(previous) = slot.take() {
            info!(from = %previous.path(), to = %path, "switching port");
            self.stop_invoke();
            previous.close().await;
        }

        self.state.send_replace(ConnectionState::Connecting);
        let config = self.settings.port.clone().with_baud_rate(baud_rate);

        let port = match self.opener.open(&path, &config).await {
            Ok(port) => port,
            Err(source) => {
                warn!(path = %path, "failed to open port: {source}");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(LinkError::Connection { path, source });
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        *slot = Some(Connection::start(
            port,
            &self.settings,
            self.bus.clone(),
            self.traffic.clone(),
            Arc::clone(&self.state),
        ));
        info!(path = %path, baud_rate, "connected");
        Ok(())
    }

    /// Close the port. Safe to call any number of times.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.stop_invoke();
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.take() {
            let path = connection.path().to_string();
            connection.close().await;
            info!(path = %path, "disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Path of the open port, if any.
    pub async fn port_name(&self) -> Option<String> {
        let slot = self.connection.lock().await;
        slot.as_ref()
            .filter(|c| !c.is_closed())
            .map(|c| c.path().to_string())
    }

    /// Issue `text` with the configured timeout and wait for its reply.
    pub async fn send_command(&self, text: &str) -> LinkResult<Frame> {
        self.send_command_with_timeout(text, self.settings.command_timeout)
            .await
    }

    /// Queue `text` behind any outstanding commands and wait for the first
    /// frame whose name carries the command name.
    ///
    /// The reply is returned as-is; a nonzero `code` is not an error here.
    pub async fn send_command_with_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> LinkResult<Frame> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Err(LinkError::InvalidArgument("empty command".to_string()));
        }

        let commands = {
            let slot = self.connection.lock().await;
            match slot.as_ref() {
                Some(connection) if !connection.is_closed() => connection.commands(),
                _ => return Err(LinkError::NotConnected),
            }
        };

        let (reply, response) = oneshot::channel();
        let pending = PendingCommand {
            text: text.to_string(),
            key: extract_command_name(text),
            timeout,
            reply,
        };
        commands
            .send(pending)
            .await
            .map_err(|_| LinkError::Disconnected)?;

        response.await.map_err(|_| LinkError::Disconnected)?
    }

    /// Write `text` immediately, without queueing or waiting for a reply.
    pub async fn send_raw(&self, text: &str) -> LinkResult<()> {
        let writer = self.writer().await?;
        writer.write_line(text).await
    }

    /// Write raw bytes to the port.
    pub async fn write(&self, bytes: &[u8]) -> LinkResult<()> {
        let writer = self.writer().await?;
        writer.write_bytes(bytes).await
    }

    async fn writer(&self) -> LinkResult<transport::LineWriter> {
        let slot = self.connection.lock().await;
        match slot.as_ref() {
            Some(connection) if !connection.is_closed() => Ok(connection.writer()),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Every decoded frame from now on.
    pub fn frames(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Run `callback` for every decoded frame until the handle is dropped.
    pub fn subscribe_frames<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&FrameEvent) + Send + 'static,
    {
        self.bus.subscribe_with(callback)
    }

    pub fn bus(&self) -> &FrameBus {
        &self.bus
    }

    /// Raw reads and writes from now on.
    pub fn traffic(&self) -> impl Stream<Item = TrafficRecord> {
        BroadcastStream::new(self.traffic.subscribe()).filter_map(|item| match item {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("traffic stream: {e}");
                None
            }
        })
    }

    /// Install the telemetry subscription, replacing any previous one.
    /// Install `handle` as the telemetry subscription and return its
    /// generation for [`stop_invoke_generation`](Self::stop_invoke_generation).
    pub(crate) fn replace_invoke(&self, handle: SubscriptionHandle) -> u64 {
        let (generation, previous) = {
            let mut slot = self.invoke.lock();
            slot.generation += 1;
            (slot.generation, slot.handle.replace(handle))
        };
        if previous.is_some() {
            debug!("replaced running invoke subscription");
        }
        generation
    }

    /// Drop the telemetry subscription. Returns whether one was running.
    pub(crate) fn stop_invoke(&self) -> bool {
        let previous = self.invoke.lock().handle.take();
        previous.is_some()
    }

    /// Drop the telemetry subscription only if it is still `generation`.
    pub(crate) fn stop_invoke_generation(&self, generation: u64) -> bool {
        let previous = {
            let mut slot = self.invoke.lock();
            if slot.generation != generation {
                return false;
            }
            slot.handle.take()
        };
        previous.is_some()
    }

    pub fn is_invoking(&self) -> bool {
        self.invoke
            .lock()
            .handle
            .as_ref()
            .map_or(false, SubscriptionHandle::is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPortOpener;

    #[test]
    fn test_resolve_port_alias() {
        let mut settings = LinkSettings::default();
        settings
            .port_aliases
            .insert("grove".to_string(), "/dev/ttyACM0".to_string());
        assert_eq!(settings.resolve_port("grove"), "/dev/ttyACM0");
        assert_eq!(settings.resolve_port("COM3"), "COM3");
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = LinkSettings::from_config(&Config::default());
        assert_eq!(settings.port.baud_rate, 921_600);
        assert_eq!(settings.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(settings.max_buffer_bytes, 512_000);
    }

    #[tokio::test]
    async fn test_commands_rejected_while_disconnected() {
        let link = DeviceLink::new(Arc::new(MockPortOpener::new()));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(matches!(
            link.send_command("AT+ID?").await,
            Err(LinkError::NotConnected)
        ));
        assert!(matches!(
            link.send_raw("AT+RST").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_failed_open_returns_to_disconnected() {
        let opener = MockPortOpener::new();
        opener.fail_next_open();
        let link = DeviceLink::new(Arc::new(opener));
        let mut states = link.watch_state();

        let err = link.connect("MOCK0", 921_600).await.unwrap_err();
        assert!(matches!(err, LinkError::Connection { .. }));
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_empty_command_is_invalid() {
        let opener = MockPortOpener::new();
        let link = DeviceLink::new(Arc::new(opener));
        link.connect("MOCK0", 921_600).await.unwrap();
        assert!(matches!(
            link.send_command("\r\n").await,
            Err(LinkError::InvalidArgument(_))
        ));
        link.disconnect().await.unwrap();
    }
}
