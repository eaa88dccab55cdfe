//! Per-connection plumbing: the write half, the reader task and teardown.

use super::bus::{FrameBus, FrameEvent, TrafficRecord};
use super::correlator::{CommandWorker, PendingCommand};
use super::LinkSettings;
use crate::error::{LinkError, LinkResult};
use crate::port::{OpenedPort, PortReader, PortWriter};
use crate::protocol::{encode_command, FrameDecoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the link to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Shared write half. Every write is mirrored onto the traffic channel.
#[derive(Clone)]
pub(crate) struct LineWriter {
    inner: Arc<Mutex<Option<PortWriter>>>,
    traffic: broadcast::Sender<TrafficRecord>,
}

impl LineWriter {
    pub(crate) fn new(writer: PortWriter, traffic: broadcast::Sender<TrafficRecord>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(writer))),
            traffic,
        }
    }

    /// Write one command, CR-terminated.
    pub(crate) async fn write_line(&self, text: &str) -> LinkResult<()> {
        self.write_bytes(&encode_command(text)).await
    }

    pub(crate) async fn write_bytes(&self, bytes: &[u8]) -> LinkResult<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        drop(guard);

        debug!(len = bytes.len(), "wrote to port");
        let _ = self.traffic.send(TrafficRecord::tx(bytes));
        Ok(())
    }

    /// Shut down and drop the write half. Later writes fail with `NotConnected`.
    pub(crate) async fn close(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("error shutting down port writer: {e}");
            }
        }
    }
}

struct ReadLoop {
    path: String,
    reader: PortReader,
    decoder: FrameDecoder,
    chunk_size: usize,
    bus: FrameBus,
    traffic: broadcast::Sender<TrafficRecord>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ReadLoop {
    async fn run(mut self) {
        let mut buf = vec![0u8; self.chunk_size.max(1)];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) => {
                    info!(path = %self.path, "port closed by device");
                    break;
                }
                Ok(n) => self.handle_chunk(&buf[..n]),
                Err(e) => {
                    warn!(path = %self.path, "port read failed: {e}");
                    break;
                }
            }
        }

        let stats = self.decoder.stats();
        debug!(
            frames = stats.frames,
            parse_errors = stats.parse_errors,
            corrupt_slices = stats.corrupt_slices,
            overflows = stats.overflows,
            "reader finished"
        );
        self.state.send_replace(ConnectionState::Disconnected);
        self.shutdown.send_replace(true);
    }

    fn handle_chunk(&mut self, chunk: &[u8]) {
        let _ = self.traffic.send(TrafficRecord::rx(chunk));
        for decoded in self.decoder.push_bytes(chunk) {
            debug!(
                kind = ?decoded.frame.kind,
                name = %decoded.frame.name,
                code = decoded.frame.code,
                "frame received"
            );
            self.bus.publish(FrameEvent::new(decoded.frame, decoded.raw));
        }
    }
}

/// An open port plus the two tasks serving it.
pub(crate) struct Connection {
    path: String,
    commands: mpsc::Sender<PendingCommand>,
    writer: LineWriter,
    shutdown: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Connection {
    /// Spawn the reader and command worker for a freshly opened port.
    pub(crate) fn start(
        port: OpenedPort,
        settings: &LinkSettings,
        bus: FrameBus,
        traffic: broadcast::Sender<TrafficRecord>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        let writer = LineWriter::new(port.writer, traffic.clone());
        let (commands, queue) = mpsc::channel(settings.command_queue_depth.max(1));

        let reader = tokio::spawn(
            ReadLoop {
                path: port.name.clone(),
                reader: port.reader,
                decoder: FrameDecoder::with_max_buffer(settings.max_buffer_bytes),
                chunk_size: settings.read_chunk_size,
                bus: bus.clone(),
                traffic,
                state,
                shutdown: Arc::clone(&shutdown),
            }
            .run(),
        );

        let worker = tokio::spawn(
            CommandWorker::new(queue, writer.clone(), bus, shutdown.subscribe()).run(),
        );

        Self {
            path: port.name,
            commands,
            writer,
            shutdown,
            reader,
            worker,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn commands(&self) -> mpsc::Sender<PendingCommand> {
        self.commands.clone()
    }

    pub(crate) fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    /// Whether the reader has seen the port go away.
    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop both tasks, reject queued commands and release the port.
    pub(crate) async fn close(self) {
        self.shutdown.send_replace(true);
        self.reader.abort();
        let _ = self.reader.await;
        if let Err(e) = self.worker.await {
            warn!("command worker ended abnormally: {e}");
        }
        self.writer.close().await;
        debug!(path = %self.path, "connection closed");
    }
}
