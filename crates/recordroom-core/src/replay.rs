//! Screen-replay batching.
//!
//! Frames are opaque JSON produced by an external recorder. Each frame takes
//! its sequence number when it is recorded; frames are shipped in batches of
//! `replay_max_batch`, or by a periodic flush, whichever comes first.

use crate::config::RecorderConfig;
use crate::emitter::Emitter;
use crate::storage::lock;
use recordroom_types::{BreadcrumbPayload, EventPayload, ReplayBatch, ReplayFrame};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug)]
struct ReplayState {
    buffer: Vec<ReplayFrame>,
    /// Frames accepted since the last restart.
    total: usize,
    max_batch: usize,
    /// 0 means no cap.
    max_total: usize,
    active: bool,
}

struct ReplayInner {
    emitter: Emitter,
    state: Mutex<ReplayState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayInner {
    fn take_batch(&self) -> Option<ReplayBatch> {
        let mut state = lock(&self.state);
        if state.buffer.is_empty() {
            return None;
        }
        let count = state.max_batch.min(state.buffer.len());
        let events: Vec<ReplayFrame> = state.buffer.drain(..count).collect();
        Some(ReplayBatch { events })
    }

    fn flush(&self) -> usize {
        let mut batches = 0;
        while let Some(batch) = self.take_batch() {
            trace!(target: "recordroom::replay", "Flushing {} replay frames", batch.events.len());
            self.emitter.enqueue_batch(batch);
            batches += 1;
        }
        batches
    }
}

#[derive(Clone)]
pub struct ReplayRecorder {
    inner: Arc<ReplayInner>,
}

impl ReplayRecorder {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            inner: Arc::new(ReplayInner {
                emitter,
                state: Mutex::new(ReplayState {
                    buffer: Vec::new(),
                    total: 0,
                    max_batch: 1,
                    max_total: 0,
                    active: false,
                }),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Start recording for a freshly attached record.
    ///
    /// Pending frames from the previous record are discarded and the lifetime
    /// counter starts over.
    pub fn restart(&self, config: &RecorderConfig) {
        {
            let mut state = lock(&self.inner.state);
            state.buffer.clear();
            state.total = 0;
            state.max_batch = config.replay_max_batch.max(1);
            state.max_total = config.replay_max_total_events;
            state.active = true;
        }
        self.arm_timer(config.replay_flush_interval());

        let mut data = Map::new();
        data.insert("maxBatch".to_string(), json!(config.replay_max_batch));
        data.insert("maxTotal".to_string(), json!(config.replay_max_total_events));
        self.inner
            .emitter
            .emit(EventPayload::Breadcrumb(BreadcrumbPayload {
                name: "rrweb".to_string(),
                message: "replay recording started".to_string(),
                data,
            }));
        debug!(target: "recordroom::replay", "Replay recording started");
    }

    fn arm_timer(&self, period: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!(target: "recordroom::replay", "No runtime; replay frames flush only by batch size");
                return;
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.flush();
            }
        });

        if let Some(previous) = lock(&self.inner.timer).replace(task) {
            previous.abort();
        }
    }

    /// Record one frame. `ts` defaults to the capture time.
    ///
    /// Returns false when the frame was dropped: recording is stopped or the
    /// lifetime cap is reached.
    pub fn record(&self, payload: Value, ts: Option<i64>) -> bool {
        let full = {
            let mut state = lock(&self.inner.state);
            if !state.active {
                return false;
            }
            if state.max_total > 0 && state.total >= state.max_total {
                return false;
            }

            let (seq, now) = self.inner.emitter.reserve();
            state.buffer.push(ReplayFrame {
                ts: ts.unwrap_or(now),
                seq,
                payload,
            });
            state.total += 1;
            state.buffer.len() >= state.max_batch
        };

        if full {
            if let Some(batch) = self.inner.take_batch() {
                self.inner.emitter.enqueue_batch(batch);
            }
        }
        true
    }

    /// Move every pending frame into the delivery queue. Returns the batch count.
    pub fn flush(&self) -> usize {
        self.inner.flush()
    }

    /// Flush what is pending and stop recording.
    pub fn stop(&self) {
        self.inner.flush();
        lock(&self.inner.state).active = false;
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).active
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.state).buffer.len()
    }

    /// Frames accepted since the last restart.
    pub fn total(&self) -> usize {
        lock(&self.inner.state).total
    }
}

impl Drop for ReplayInner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
    }
}
