//! Capture emitter: the single entry point instrumentation sources hand events to.
//!
//! Sequence numbers are taken under the same lock as the enqueue, so the queue
//! holds single events in seq order even when sources emit from several threads.

use crate::queue::DeliveryQueue;
use crate::redaction::RedactionFilter;
use crate::storage::lock;
use recordroom_types::{CapturedEvent, EventKind, EventPayload, ReplayBatch};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Current time in ms since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default)]
struct StreamClock {
    last_seq: u64,
    last_ts: i64,
}

impl StreamClock {
    fn advance(&mut self, now: i64) -> (u64, i64) {
        self.last_seq += 1;
        self.last_ts = self.last_ts.max(now);
        (self.last_seq, self.last_ts)
    }
}

struct EmitterInner {
    clock: Mutex<StreamClock>,
    filter: RwLock<RedactionFilter>,
    queue: Arc<DeliveryQueue>,
}

/// Stamps events with seq/ts and hands accepted ones to the delivery queue.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl Emitter {
    pub fn new(queue: Arc<DeliveryQueue>) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                clock: Mutex::new(StreamClock::default()),
                filter: RwLock::new(RedactionFilter::default()),
                queue,
            }),
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.inner.queue
    }

    /// Replace the redaction filter (on every record attach).
    pub fn set_filter(&self, filter: RedactionFilter) {
        let mut guard = self
            .inner
            .filter
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = filter;
    }

    /// Emit one event. Returns the assigned seq, or `None` if the filter dropped it.
    pub fn emit(&self, mut payload: EventPayload) -> Option<u64> {
        let accepted = self
            .inner
            .filter
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .accept(&mut payload);
        if !accepted {
            return None;
        }

        let mut clock = lock(&self.inner.clock);
        let (seq, ts) = clock.advance(now_ms());
        self.inner.queue.enqueue(CapturedEvent { seq, ts, payload });
        Some(seq)
    }

    /// Emit an event whose payload is built by `build`.
    ///
    /// A builder that fails or panics still produces an event, with a
    /// placeholder payload of the same kind, so the stream has no gap.
    pub fn emit_with<E, F>(&self, kind: EventKind, build: F) -> Option<u64>
    where
        E: Display,
        F: FnOnce() -> std::result::Result<EventPayload, E>,
    {
        let payload = match panic::catch_unwind(AssertUnwindSafe(build)) {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                debug!(target: "recordroom::capture", "Degrading {} event: {}", kind, e);
                EventPayload::placeholder(kind)
            }
            Err(_) => {
                debug!(target: "recordroom::capture", "Degrading {} event after a panic", kind);
                EventPayload::placeholder(kind)
            }
        };
        self.emit(payload)
    }

    /// Take the next seq and ts without enqueuing anything. Used by replay frames,
    /// which are numbered at capture and shipped later in a batch.
    pub fn reserve(&self) -> (u64, i64) {
        lock(&self.inner.clock).advance(now_ms())
    }

    /// Enqueue a replay batch. Its top-level seq/ts are those of its first frame.
    pub fn enqueue_batch(&self, batch: ReplayBatch) -> Option<u64> {
        let first = batch.events.first()?;
        let (seq, ts) = (first.seq, first.ts);
        self.inner.queue.enqueue(CapturedEvent {
            seq,
            ts,
            payload: EventPayload::Rrweb(batch),
        });
        Some(seq)
    }

    /// Restart numbering for a new record. The next event gets seq 1.
    pub fn reset(&self) {
        lock(&self.inner.clock).last_seq = 0;
    }

    pub fn last_seq(&self) -> u64 {
        lock(&self.inner.clock).last_seq
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("last_seq", &self.last_seq())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::endpoint::Endpoint;
    use recordroom_types::{ConsoleLevel, ConsolePayload, NetworkPayload, ReplayFrame};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn console(message: &str) -> EventPayload {
        EventPayload::Console(ConsolePayload {
            level: ConsoleLevel::Log,
            message: message.to_string(),
            stack: None,
        })
    }

    fn network(url: &str) -> EventPayload {
        EventPayload::Network(NetworkPayload {
            client_request_id: "n_1".to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            status: 200,
            request_headers: BTreeMap::new(),
            request_body: None,
            response_headers: BTreeMap::new(),
            response_body: None,
            started_at_epoch_ms: 0,
            duration_ms: 0,
            error: None,
        })
    }

    fn emitter() -> Emitter {
        Emitter::new(Arc::new(DeliveryQueue::new()))
    }

    #[test]
    fn test_three_console_events() {
        let emitter = emitter();
        for _ in 0..3 {
            emitter.emit(console("hi"));
        }

        let events = emitter.queue().snapshot();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(events.iter().all(|e| e.kind() == EventKind::Console));
        assert!(events.windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[test]
    fn test_filtered_events_take_no_seq() {
        let emitter = emitter();
        let endpoint = Endpoint::parse("http://localhost:8080").unwrap();
        emitter.set_filter(RedactionFilter::new(&RecorderConfig::default(), Some(endpoint)));

        assert_eq!(emitter.emit(console("a")), Some(1));
        assert_eq!(emitter.emit(network("http://localhost:8080/api/records")), None);
        assert_eq!(emitter.emit(network("http://api.test/users")), Some(2));
        assert_eq!(emitter.queue().len(), 2);
    }

    #[test]
    fn test_sampled_network_events_keep_contiguous_seqs() {
        let emitter = emitter();
        let config = RecorderConfig {
            sample_rate: 0.5,
            ..RecorderConfig::default()
        };
        emitter.set_filter(RedactionFilter::new(&config, None));

        let mut accepted = Vec::new();
        for i in 0..400 {
            let payload = if i % 2 == 0 {
                console("always kept")
            } else {
                network("http://api.test/users")
            };
            if let Some(seq) = emitter.emit(payload) {
                accepted.push(seq);
            }
        }

        let networks = emitter
            .queue()
            .snapshot()
            .iter()
            .filter(|e| e.kind() == EventKind::Network)
            .count();
        assert!(networks > 0 && networks < 200, "kept {} network events", networks);
        assert_eq!(accepted.len(), 200 + networks);
        let expected: Vec<u64> = (1..=accepted.len() as u64).collect();
        assert_eq!(accepted, expected);
        let queued: Vec<u64> = emitter.queue().snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(queued, expected);
    }

    #[test]
    fn test_failed_builder_degrades_to_placeholder() {
        let emitter = emitter();
        let seq = emitter.emit_with(EventKind::Console, || Err::<EventPayload, _>("boom"));
        assert_eq!(seq, Some(1));

        let seq = emitter.emit_with(EventKind::Breadcrumb, || -> Result<EventPayload, String> {
            panic!("introspection failed")
        });
        assert_eq!(seq, Some(2));

        let events = emitter.queue().snapshot();
        assert_eq!(events[0].payload, EventPayload::placeholder(EventKind::Console));
        assert_eq!(events[1].kind(), EventKind::Breadcrumb);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let emitter = emitter();
        emitter.emit(console("a"));
        emitter.emit(console("b"));
        emitter.reset();
        assert_eq!(emitter.emit(console("c")), Some(1));
    }

    #[test]
    fn test_batch_takes_first_frame_position() {
        let emitter = emitter();
        let (seq_a, ts_a) = emitter.reserve();
        emitter.emit(console("between"));
        let (seq_b, ts_b) = emitter.reserve();

        let batch = ReplayBatch {
            events: vec![
                ReplayFrame { ts: ts_a, seq: seq_a, payload: json!({"type": 2}) },
                ReplayFrame { ts: ts_b, seq: seq_b, payload: json!({"type": 3}) },
            ],
        };
        assert_eq!(emitter.enqueue_batch(batch), Some(1));
        assert_eq!(emitter.enqueue_batch(ReplayBatch { events: vec![] }), None);

        let events = emitter.queue().snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[1].kind(), EventKind::Rrweb);
    }

    #[test]
    fn test_concurrent_emits_keep_queue_in_seq_order() {
        let emitter = emitter();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        emitter.emit(console("x"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seqs: Vec<u64> = emitter.queue().snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=1000).collect::<Vec<u64>>());
    }

    mod proptest_emitter {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Accepted events are numbered 1..k in emission order, whatever was dropped.
            #[test]
            fn accepted_seqs_are_contiguous(internal in proptest::collection::vec(any::<bool>(), 0..64)) {
                let emitter = emitter();
                let endpoint = Endpoint::parse("http://localhost:8080").unwrap();
                emitter.set_filter(RedactionFilter::new(&RecorderConfig::default(), Some(endpoint)));

                for (i, is_internal) in internal.iter().enumerate() {
                    let url = if *is_internal {
                        "http://localhost:8080/ws/ingest".to_string()
                    } else {
                        format!("http://api.test/{}", i)
                    };
                    emitter.emit(network(&url));
                }

                let kept = internal.iter().filter(|b| !**b).count() as u64;
                let seqs: Vec<u64> = emitter.queue().snapshot().iter().map(|e| e.seq).collect();
                prop_assert_eq!(seqs, (1..=kept).collect::<Vec<u64>>());
            }
        }
    }
}
