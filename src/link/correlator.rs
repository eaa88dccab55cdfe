//! FIFO command queue and reply correlation.
//!
//! Replies carry no request id, only the command name. Correlation is only
//! unambiguous while a single command is outstanding, so one worker task
//! drains the queue and never writes the next command until the current one
//! has been answered or timed out.

use super::bus::FrameBus;
use super::transport::LineWriter;
use crate::error::{LinkError, LinkResult};
use crate::protocol::Frame;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, warn};

/// A command waiting in the queue or in flight.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub text: String,
    pub key: String,
    pub timeout: Duration,
    pub reply: oneshot::Sender<LinkResult<Frame>>,
}

/// Single consumer of the command queue for one connection.
pub(crate) struct CommandWorker {
    queue: mpsc::Receiver<PendingCommand>,
    writer: LineWriter,
    bus: FrameBus,
    shutdown: watch::Receiver<bool>,
}

impl CommandWorker {
    pub(crate) fn new(
        queue: mpsc::Receiver<PendingCommand>,
        writer: LineWriter,
        bus: FrameBus,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            writer,
            bus,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => None,
                command = self.queue.recv() => command,
            };
            let Some(command) = next else { break };

            if command.reply.is_closed() {
                debug!(command = %command.text, "caller gone, skipping command");
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => None,
                result = issue(&self.writer, &self.bus, &command) => Some(result),
            };

            match outcome {
                Some(result) => {
                    let _ = command.reply.send(result);
                }
                None => {
                    let _ = command.reply.send(Err(LinkError::Disconnected));
                    break;
                }
            }
        }

        self.queue.close();
        let mut rejected = 0usize;
        while let Ok(command) = self.queue.try_recv() {
            let _ = command.reply.send(Err(LinkError::Disconnected));
            rejected += 1;
        }
        if rejected > 0 {
            debug!(rejected, "rejected queued commands on disconnect");
        }
    }
}

async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown too.
    let _ = shutdown.wait_for(|done| *done).await;
}

/// Write one command and wait for the first frame whose name carries its key.
///
/// The timeout covers the write as well, so a port that stops draining
/// cannot hold the queue past the command's budget.
async fn issue(writer: &LineWriter, bus: &FrameBus, command: &PendingCommand) -> LinkResult<Frame> {
    // Subscribe before writing so a fast reply cannot slip past.
    let mut frames = bus.subscribe();

    debug!(command = %command.text, key = %command.key, "issuing command");
    let exchange = async {
        writer.write_line(&command.text).await?;
        while let Some(event) = frames.recv().await {
            if event.frame.answers(&command.key) {
                return Ok(event.frame.clone());
            }
        }
        Err(LinkError::Disconnected)
    };

    match time::timeout(command.timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            warn!(command = %command.text, timeout = ?command.timeout, "command timed out");
            Err(LinkError::Timeout {
                command: command.text.clone(),
                timeout: command.timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::bus::{FrameEvent, TrafficRecord};
    use crate::protocol::FrameKind;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::broadcast;

    struct Harness {
        commands: mpsc::Sender<PendingCommand>,
        bus: FrameBus,
        device: DuplexStream,
        shutdown: watch::Sender<bool>,
        worker: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (engine, device) = tokio::io::duplex(4096);
        let (traffic, _) = broadcast::channel::<TrafficRecord>(16);
        let writer = LineWriter::new(Box::new(engine), traffic);
        let bus = FrameBus::new(16);
        let (commands, queue) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(CommandWorker::new(queue, writer, bus.clone(), shutdown_rx).run());
        Harness {
            commands,
            bus,
            device,
            shutdown,
            worker,
        }
    }

    async fn submit(
        commands: &mpsc::Sender<PendingCommand>,
        text: &str,
        key: &str,
        timeout_ms: u64,
    ) -> oneshot::Receiver<LinkResult<Frame>> {
        let (reply, rx) = oneshot::channel();
        commands
            .send(PendingCommand {
                text: text.to_string(),
                key: key.to_string(),
                timeout: Duration::from_millis(timeout_ms),
                reply,
            })
            .await
            .unwrap();
        rx
    }

    fn reply(name: &str) -> FrameEvent {
        FrameEvent::new(
            Frame {
                kind: FrameKind::Reply,
                name: name.to_string(),
                code: 0,
                data: Value::Null,
            },
            String::new(),
        )
    }

    async fn read_available(device: &mut DuplexStream) -> String {
        let mut buf = [0u8; 256];
        let n = time::timeout(Duration::from_millis(100), device.read(&mut buf))
            .await
            .map(|r| r.unwrap())
            .unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_second_command_waits_for_first_reply() {
        let mut h = harness();
        let first = submit(&h.commands, "AT+ID?", "ID?", 1000).await;
        let second = submit(&h.commands, "AT+NAME?", "NAME?", 1000).await;

        assert_eq!(read_available(&mut h.device).await, "AT+ID?\r");
        assert_eq!(read_available(&mut h.device).await, "");

        h.bus.publish(reply("ID?"));
        assert_eq!(first.await.unwrap().unwrap().name, "ID?");
        assert_eq!(read_available(&mut h.device).await, "AT+NAME?\r");

        h.bus.publish(reply("NAME?"));
        assert_eq!(second.await.unwrap().unwrap().name, "NAME?");
    }

    #[tokio::test]
    async fn test_timeout_advances_queue() {
        let mut h = harness();
        let first = submit(&h.commands, "AT+ID?", "ID?", 50).await;
        let second = submit(&h.commands, "AT+VER?", "VER?", 1000).await;

        assert_eq!(read_available(&mut h.device).await, "AT+ID?\r");
        let err = first.await.unwrap().unwrap_err();
        assert!(err.is_timeout());

        assert_eq!(read_available(&mut h.device).await, "AT+VER?\r");
        h.bus.publish(reply("VER?"));
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_in_flight_and_queued() {
        let h = harness();
        let first = submit(&h.commands, "AT+ID?", "ID?", 5000).await;
        let second = submit(&h.commands, "AT+NAME?", "NAME?", 5000).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        h.shutdown.send_replace(true);

        assert!(matches!(first.await.unwrap(), Err(LinkError::Disconnected)));
        assert!(matches!(second.await.unwrap(), Err(LinkError::Disconnected)));
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_write_times_out_and_frees_queue() {
        // The device side never reads, so a line larger than the pipe blocks mid-write.
        let h = harness();
        let long = format!("AT+LOG={}", "x".repeat(10_000));
        let started = time::Instant::now();
        let first = submit(&h.commands, &long, "LOG", 100).await;
        let second = submit(&h.commands, "AT+ID?", "ID?", 100).await;

        let first = time::timeout(Duration::from_secs(1), first)
            .await
            .expect("stalled write never settled")
            .unwrap();
        assert!(first.unwrap_err().is_timeout());

        let second = time::timeout(Duration::from_secs(1), second)
            .await
            .expect("queued command stuck behind stalled write")
            .unwrap();
        assert!(second.unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(h.device);
    }
}
