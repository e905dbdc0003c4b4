//! Client-side telemetry capture and transport for Recordroom.

mod backend;
mod capture;
mod config;
mod connection;
mod emitter;
mod endpoint;
mod error;
mod identity;
mod lifecycle;
mod queue;
mod recorder;
mod redaction;
mod replay;
mod storage;
mod transport;

pub use backend::{HttpRecordApi, RecordApi};
pub use capture::{
    BodySource, BreadcrumbCapture, CaptureSources, CapturedResponse, ConsoleCapture, ConsoleLayer,
    HeaderSource, InstrumentedClient, NetworkCapture, RequestSpan, SourceKind, MASKED_VALUE,
    UNREADABLE_BODY,
};
pub use config::RecorderConfig;
pub use connection::ConnectionManager;
pub use emitter::{now_ms, Emitter};
pub use endpoint::{Endpoint, INTERNAL_PATHS};
pub use error::RecordroomError;
pub use identity::{ensure_session_id, resolve_identity, stored_record_id, Identity};
pub use lifecycle::{LifecycleController, LifecycleStatus};
pub use queue::DeliveryQueue;
pub use recorder::{Recorder, RecorderBuilder};
pub use redaction::{truncate_body, RedactionFilter, NON_STRING_BODY, TRUNCATION_MARKER};
pub use replay::ReplayRecorder;
pub use storage::{MemoryStore, SqliteStore, StateStore};
pub use transport::memory::{MemoryConnector, SentFrame};
pub use transport::{Connector, Transport, WebSocketConnector, WebSocketTransport};

/// Result type for Recordroom operations.
pub type Result<T> = std::result::Result<T, RecordroomError>;
