//! Fan-out of decoded frames and raw traffic.
//!
//! Every decoded frame is published once and seen by every subscriber; the
//! command correlator is just one of them. Nothing is consumed, so telemetry
//! keeps flowing to its observers while replies are being matched.

use crate::protocol::Frame;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

/// A decoded frame plus when and from what text it was decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEvent {
    pub time: DateTime<Utc>,
    pub raw: String,
    pub frame: Frame,
}

impl FrameEvent {
    pub fn new(frame: Frame, raw: String) -> Self {
        Self {
            time: Utc::now(),
            raw,
            frame,
        }
    }
}

/// Direction of a traffic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Rx,
    Tx,
}

/// One read from or write to the port, for raw monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficRecord {
    pub time: DateTime<Utc>,
    pub text: String,
    pub direction: Direction,
}

impl TrafficRecord {
    pub fn rx(bytes: &[u8]) -> Self {
        Self {
            time: Utc::now(),
            text: String::from_utf8_lossy(bytes).into_owned(),
            direction: Direction::Rx,
        }
    }

    pub fn tx(bytes: &[u8]) -> Self {
        Self {
            time: Utc::now(),
            text: String::from_utf8_lossy(bytes).into_owned(),
            direction: Direction::Tx,
        }
    }
}

/// Broadcast point for decoded frames.
#[derive(Debug, Clone)]
pub struct FrameBus {
    tx: broadcast::Sender<Arc<FrameEvent>>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver `event` to every current subscriber.
    pub fn publish(&self, event: FrameEvent) {
        // Ignore send errors - they just mean no active receivers
        let _ = self.tx.send(Arc::new(event));
    }

    /// Pull-style subscription starting at the next published frame.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Run `callback` for every frame until the returned handle is
    /// unsubscribed or dropped. Must be called within a Tokio runtime.
    pub fn subscribe_with<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&FrameEvent) + Send + 'static,
    {
        let callback: Box<dyn FnMut(&FrameEvent) + Send> = Box::new(callback);
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callback)));
        let registered = Arc::clone(&slot);
        let mut subscription = self.subscribe();

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let mut guard = registered.lock();
                let Some(callback) = guard.as_mut() else { break };
                callback(event.as_ref());
            }
        });

        SubscriptionHandle { slot, task }
    }

    /// Receivers currently attached, callback subscriptions included.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of a [`FrameBus`].
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Arc<FrameEvent>>,
}

impl Subscription {
    /// Next frame, or `None` once the bus is gone. A subscriber that falls
    /// behind skips the frames it missed.
    pub async fn recv(&mut self) -> Option<Arc<FrameEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "frame subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The subscription as a stream, with lag gaps skipped.
    pub fn into_stream(self) -> impl Stream<Item = Arc<FrameEvent>> {
        BroadcastStream::new(self.rx).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("frame stream: {e}");
                None
            }
        })
    }
}

type CallbackSlot = Arc<Mutex<Option<Box<dyn FnMut(&FrameEvent) + Send>>>>;

/// Registration created by [`FrameBus::subscribe_with`].
///
/// Unsubscribing takes effect immediately: once `unsubscribe` returns the
/// callback is not running and is never invoked again, even for frames
/// already queued. A callback in progress is waited for, so a callback must
/// not unsubscribe its own handle.
pub struct SubscriptionHandle {
    slot: CallbackSlot,
    task: JoinHandle<()>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some() && !self.task.is_finished()
    }


    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.slot.lock().take();
        self.task.abort();
    }
}
