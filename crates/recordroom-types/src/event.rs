//! Captured events and their shape on the ingest transport.
//!
//! Every event travels as one JSON text frame of the form
//! `{"type": ..., "seq": ..., "ts": ..., <kind-specific fields>}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Placeholder text used when a payload could not be built.
pub const UNAVAILABLE: &str = "[unavailable]";

/// The four kinds of captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Console,
    Network,
    Breadcrumb,
    /// Screen-replay batch.
    Rrweb,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Console => "console",
            EventKind::Network => "network",
            EventKind::Breadcrumb => "breadcrumb",
            EventKind::Rrweb => "rrweb",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Console severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

/// A captured event, stamped with its stream position and capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Per-record sequence number, starting at 1.
    pub seq: u64,
    /// Capture time (ms since Unix epoch).
    pub ts: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CapturedEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Kind-specific event body. The `type` tag is shared with [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    Console(ConsolePayload),
    Network(NetworkPayload),
    Breadcrumb(BreadcrumbPayload),
    Rrweb(ReplayBatch),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Console(_) => EventKind::Console,
            EventPayload::Network(_) => EventKind::Network,
            EventPayload::Breadcrumb(_) => EventKind::Breadcrumb,
            EventPayload::Rrweb(_) => EventKind::Rrweb,
        }
    }

    /// Minimal payload of the given kind, used when building the real one failed.
    pub fn placeholder(kind: EventKind) -> Self {
        match kind {
            EventKind::Console => EventPayload::Console(ConsolePayload {
                level: ConsoleLevel::Log,
                message: UNAVAILABLE.to_string(),
                stack: None,
            }),
            EventKind::Network => EventPayload::Network(NetworkPayload {
                client_request_id: String::new(),
                method: "GET".to_string(),
                url: String::new(),
                status: 0,
                request_headers: BTreeMap::new(),
                request_body: None,
                response_headers: BTreeMap::new(),
                response_body: None,
                started_at_epoch_ms: 0,
                duration_ms: 0,
                error: Some(UNAVAILABLE.to_string()),
            }),
            EventKind::Breadcrumb => EventPayload::Breadcrumb(BreadcrumbPayload {
                name: "custom".to_string(),
                message: UNAVAILABLE.to_string(),
                data: Map::new(),
            }),
            EventKind::Rrweb => EventPayload::Rrweb(ReplayBatch { events: Vec::new() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolePayload {
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// One observed HTTP exchange, after header redaction and body truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPayload {
    /// Client-generated correlation id.
    pub client_request_id: String,
    pub method: String,
    pub url: String,
    /// 0 when no response was received.
    pub status: u16,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_body: Option<String>,
    pub started_at_epoch_ms: i64,
    pub duration_ms: i64,
    /// Transport-level failure, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// A named user-interaction or navigation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreadcrumbPayload {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// An opaque screen-replay frame with its own stream position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub ts: i64,
    pub seq: u64,
    pub payload: Value,
}

/// Frames grouped into a single transport message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBatch {
    pub events: Vec<ReplayFrame>,
}
