//! Connection manager: owns the single outbound transport.
//!
//! One background worker follows the configured ingest URL. It connects,
//! drains the delivery queue while the transport is open, and after a close or
//! failure waits a fixed delay before trying again, for as long as a URL is
//! configured. Nothing else opens, closes or replaces the transport.

use crate::queue::DeliveryQueue;
use crate::storage::lock;
use crate::transport::{Connector, Transport};
use recordroom_types::ConnectionState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a superseded transport gets to close cleanly.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

enum PumpEnd {
    /// The target URL changed or was cleared.
    Superseded,
    /// The transport closed or a send failed.
    Lost,
}

struct Shared {
    connector: Arc<dyn Connector>,
    queue: Arc<DeliveryQueue>,
    target: watch::Sender<Option<String>>,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Mutex<Duration>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(target: "recordroom::transport", "Connection state -> {:?}", next);
        }
    }

    /// Sleep the reconnect delay, cut short by a target change.
    async fn wait_reconnect(&self, target: &mut watch::Receiver<Option<String>>) {
        let delay = *lock(&self.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = target.changed() => {}
        }
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        queue: Arc<DeliveryQueue>,
        reconnect_delay: Duration,
    ) -> Self {
        let (target, _) = watch::channel(None);
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            shared: Arc::new(Shared {
                connector,
                queue,
                target,
                state,
                reconnect_delay: Mutex::new(reconnect_delay),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Point the manager at `url`.
    ///
    /// A no-op when already Open or Connecting to the same URL. Otherwise the
    /// worker drops any current transport and connects to `url` right away.
    pub fn ensure_open(&self, url: &str) {
        let state = self.state();
        let same_target = self.shared.target.borrow().as_deref() == Some(url);
        if same_target && matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
            return;
        }

        self.shared
            .target
            .send_modify(|target| *target = Some(url.to_string()));
        self.spawn_worker();
    }

    /// Forget the ingest URL. The worker closes the transport and stays Closed.
    pub fn clear(&self) {
        self.shared.target.send_modify(|target| *target = None);
    }

    pub fn target(&self) -> Option<String> {
        self.shared.target.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn set_reconnect_delay(&self, delay: Duration) {
        *lock(&self.shared.reconnect_delay) = delay;
    }

    /// Wake the worker so it drains now.
    pub fn wake(&self) {
        self.shared.queue.wake();
    }

    fn spawn_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => *worker = Some(runtime.spawn(run(self.shared.clone()))),
            Err(_) => {
                warn!(target: "recordroom::transport", "No tokio runtime; ingest connection not started")
            }
        }
    }

    /// Clear the target, give the worker a moment to close, then stop it.
    pub async fn shutdown(&self) {
        self.clear();
        let mut state = self.subscribe_state();
        let _ = tokio::time::timeout(
            CLOSE_TIMEOUT,
            state.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await;

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.abort();
        }
        self.shared.set_state(ConnectionState::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let mut target = shared.target.subscribe();
    loop {
        let url = target.borrow_and_update().clone();
        let Some(url) = url else {
            shared.set_state(ConnectionState::Closed);
            if target.changed().await.is_err() {
                return;
            }
            continue;
        };

        shared.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            result = shared.connector.connect(&url) => Some(result),
            _ = target.changed() => None,
        };
        let mut transport = match connected {
            // Target changed mid-connect; start over with the new one.
            None => continue,
            Some(Ok(transport)) => transport,
            Some(Err(e)) => {
                warn!(target: "recordroom::transport", "Failed to connect to {}: {}", url, e);
                shared.set_state(ConnectionState::Reconnecting);
                shared.wait_reconnect(&mut target).await;
                continue;
            }
        };

        shared.set_state(ConnectionState::Open);
        info!(target: "recordroom::transport", "Ingest connection open: {}", url);

        match pump(&shared, transport.as_mut(), &url, &mut target).await {
            PumpEnd::Superseded => {
                debug!(target: "recordroom::transport", "Closing superseded connection to {}", url);
                match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(target: "recordroom::transport", "Close failed: {}", e),
                    Err(_) => debug!(target: "recordroom::transport", "Close timed out"),
                }
            }
            PumpEnd::Lost => {
                info!(
                    target: "recordroom::transport",
                    "Ingest connection lost; {} events queued",
                    shared.queue.len()
                );
                shared.set_state(ConnectionState::Reconnecting);
                shared.wait_reconnect(&mut target).await;
            }
        }
    }
}

fn is_current(target: &watch::Receiver<Option<String>>, url: &str) -> bool {
    target.borrow().as_deref() == Some(url)
}

/// Drain whenever work arrives, until the transport goes away or the target moves.
///
/// The target is checked before every event, so nothing queued after a record
/// switch reaches the superseded transport.
async fn pump(
    shared: &Shared,
    transport: &mut dyn Transport,
    url: &str,
    target: &mut watch::Receiver<Option<String>>,
) -> PumpEnd {
    loop {
        if !is_current(target, url) {
            return PumpEnd::Superseded;
        }
        let watched = &*target;
        if let Err(e) = shared
            .queue
            .drain_while(transport, || is_current(watched, url))
            .await
        {
            debug!(target: "recordroom::transport", "Drain stopped: {}", e);
            return PumpEnd::Lost;
        }
        if !is_current(target, url) {
            return PumpEnd::Superseded;
        }

        tokio::select! {
            biased;
            changed = target.changed() => {
                if changed.is_err() {
                    return PumpEnd::Superseded;
                }
            }
            _ = transport.closed() => return PumpEnd::Lost,
            _ = shared.queue.wait_for_work() => {}
        }
    }
}
