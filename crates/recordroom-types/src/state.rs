//! Lifecycle and connection state machines, and the public state snapshot.

use serde::{Deserialize, Serialize};

/// Record lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Reading storage and deciding between attach and create.
    Resolving,
    /// Asking the backend for a new record.
    Creating,
    /// A record is active and capture is armed.
    Attached,
    /// The last start attempt failed.
    Failed,
}

/// Ingest transport state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

/// Snapshot read by status surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderState {
    pub record_id: Option<String>,
    pub session_id: Option<String>,
    pub previous_record_id: Option<String>,
    pub share_url: Option<String>,
    pub ingest_ws_url: Option<String>,
    pub lifecycle: LifecycleState,
    pub connection: ConnectionState,
    /// Events waiting in the delivery queue.
    pub queued: usize,
}
