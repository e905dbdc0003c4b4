//! Delivery queue: ordered, in-memory buffer of events not yet handed to the
//! transport.
//!
//! - Enqueue never blocks and never applies back-pressure
//! - Only the connection manager drains
//! - A failed hand-off puts the event back at the head, so order survives reconnects

use crate::storage::lock;
use crate::transport::Transport;
use crate::Result;
use recordroom_types::CapturedEvent;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{trace, warn};

#[derive(Debug, Default)]
pub struct DeliveryQueue {
    events: Mutex<VecDeque<CapturedEvent>>,
    /// Wakes the drainer when work arrives. `notify_one` keeps a permit, so a
    /// wake-up sent while nobody waits is not lost.
    work: Notify,
    /// Signalled whenever a drain empties the queue.
    emptied: Notify,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail and wake the drainer.
    pub fn enqueue(&self, event: CapturedEvent) {
        lock(&self.events).push_back(event);
        self.work.notify_one();
    }

    pub fn pop_front(&self) -> Option<CapturedEvent> {
        lock(&self.events).pop_front()
    }

    /// Put an event back at the head after a failed hand-off.
    pub fn requeue_front(&self, event: CapturedEvent) {
        lock(&self.events).push_front(event);
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Copy of the queued events, head first.
    pub fn snapshot(&self) -> Vec<CapturedEvent> {
        lock(&self.events).iter().cloned().collect()
    }

    /// Nudge the drainer without enqueuing anything.
    pub fn wake(&self) {
        self.work.notify_one();
    }

    pub(crate) async fn wait_for_work(&self) {
        self.work.notified().await;
    }

    /// Send queued events head-first until the queue is empty or a send fails.
    ///
    /// On failure the event is requeued at the head and the error returned.
    /// Returns the number of events handed off.
    pub async fn drain(&self, transport: &mut dyn Transport) -> Result<usize> {
        self.drain_while(transport, || true).await
    }

    /// Like [`drain`](Self::drain), but checks `keep_going` before taking each
    /// event and stops early once it returns false.
    pub async fn drain_while<F>(&self, transport: &mut dyn Transport, keep_going: F) -> Result<usize>
    where
        F: Fn() -> bool + Send,
    {
        let mut sent = 0;
        while keep_going() {
            let Some(event) = self.pop_front() else {
                self.emptied.notify_waiters();
                break;
            };
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(target: "recordroom::queue", "Dropping unserializable event seq={}: {}", event.seq, e);
                    continue;
                }
            };

            if let Err(e) = transport.send(frame).await {
                trace!(target: "recordroom::queue", "Hand-off failed at seq={}, requeued", event.seq);
                self.requeue_front(event);
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Wait until the queue is empty, up to `timeout`. Returns whether it emptied.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let emptied = self.emptied.notified();
            tokio::pin!(emptied);
            emptied.as_mut().enable();

            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, emptied).await.is_err() {
                return self.is_empty();
            }
        }
    }
}
