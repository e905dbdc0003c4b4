//! In-process transport for tests and embedding hosts that want to observe
//! the outbound stream without a network.

use super::{Connector, Transport};
use crate::storage::lock;
use crate::{RecordroomError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A frame handed to a memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Default)]
struct HubState {
    frames: Vec<SentFrame>,
    connects: Vec<String>,
    refuse: bool,
    fail_sends: bool,
    /// Bumped by `drop_connection`; transports from older generations are dead.
    generation: u64,
}

#[derive(Debug, Default)]
struct Hub {
    state: Mutex<HubState>,
    dropped: Notify,
}

/// Connector whose transports record every frame in a shared hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    hub: Arc<Hub>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<SentFrame> {
        lock(&self.hub.state).frames.clone()
    }

    /// Sent frames parsed as JSON. Frames that do not parse are skipped.
    pub fn events(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_str(&f.text).ok())
            .collect()
    }

    /// URLs of every successful connect, in order.
    pub fn connects(&self) -> Vec<String> {
        lock(&self.hub.state).connects.clone()
    }

    /// Refuse new connections while set.
    pub fn set_refuse(&self, refuse: bool) {
        lock(&self.hub.state).refuse = refuse;
    }

    /// Fail every send while set.
    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.hub.state).fail_sends = fail;
    }

    /// Kill every open transport, as if the peer went away.
    pub fn drop_connection(&self) {
        lock(&self.hub.state).generation += 1;
        self.hub.dropped.notify_waiters();
    }

    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.frames.len() >= count).await
    }

    pub async fn wait_for_connects(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.connects.len() >= count).await
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn(&HubState) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let finished = done(&lock(&self.hub.state));
            if finished {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let mut state = lock(&self.hub.state);
        if state.refuse {
            return Err(RecordroomError::Transport(format!("connection refused: {}", url)));
        }
        state.connects.push(url.to_string());
        Ok(Box::new(MemoryTransport {
            hub: self.hub.clone(),
            url: url.to_string(),
            generation: state.generation,
            closed: false,
        }))
    }
}

struct MemoryTransport {
    hub: Arc<Hub>,
    url: String,
    generation: u64,
    closed: bool,
}

impl MemoryTransport {
    fn is_dead(&self, state: &HubState) -> bool {
        self.closed || state.generation != self.generation
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        let mut state = lock(&self.hub.state);
        if self.is_dead(&state) {
            return Err(RecordroomError::Transport("connection closed".to_string()));
        }
        if state.fail_sends {
            return Err(RecordroomError::Transport("send failed".to_string()));
        }
        state.frames.push(SentFrame {
            url: self.url.clone(),
            text: frame,
        });
        Ok(())
    }

    async fn closed(&mut self) {
        loop {
            let dropped = self.hub.dropped.notified();
            tokio::pin!(dropped);
            dropped.as_mut().enable();

            let dead = self.is_dead(&lock(&self.hub.state));
            if dead {
                return;
            }
            dropped.await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
