//! The recorder facade: one instance wires the capture sources, sequencer,
//! queue, connection manager and lifecycle controller together.

use crate::backend::{HttpRecordApi, RecordApi};
use crate::capture::{
    BreadcrumbCapture, CaptureSources, ConsoleCapture, ConsoleLayer, InstrumentedClient,
    NetworkCapture,
};
use crate::config::RecorderConfig;
use crate::connection::ConnectionManager;
use crate::emitter::Emitter;
use crate::lifecycle::{LifecycleController, LifecycleStatus};
use crate::queue::DeliveryQueue;
use crate::replay::ReplayRecorder;
use crate::storage::{MemoryStore, SqliteStore, StateStore};
use crate::transport::{Connector, WebSocketConnector};
use crate::Result;
use recordroom_types::{BreadcrumbPayload, ConnectionState, EventPayload, RecorderState};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

struct RecorderInner {
    config: RecorderConfig,
    emitter: Emitter,
    connection: Arc<ConnectionManager>,
    sources: Arc<CaptureSources>,
    replay: ReplayRecorder,
    lifecycle: LifecycleController,
}

/// Handle to a running recorder. Cheap to clone.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

/// Builds a [`Recorder`] with replaceable backend, transport and storage.
pub struct RecorderBuilder {
    config: RecorderConfig,
    api: Option<Arc<dyn RecordApi>>,
    connector: Option<Arc<dyn Connector>>,
    store: Option<Arc<dyn StateStore>>,
}

impl RecorderBuilder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            api: None,
            connector: None,
            store: None,
        }
    }

    pub fn with_api(mut self, api: Arc<dyn RecordApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Opens the SQLite store when `storage_path` is set and no store was given.
    pub fn build(self) -> Result<Recorder> {
        let store: Arc<dyn StateStore> = match (self.store, &self.config.storage_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(SqliteStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let api = self
            .api
            .unwrap_or_else(|| Arc::new(HttpRecordApi::new()) as Arc<dyn RecordApi>);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector) as Arc<dyn Connector>);

        let queue = Arc::new(DeliveryQueue::new());
        let emitter = Emitter::new(queue.clone());
        let connection = Arc::new(ConnectionManager::new(
            connector,
            queue,
            self.config.reconnect_delay(),
        ));
        let sources = Arc::new(CaptureSources::new(emitter.clone()));
        let replay = ReplayRecorder::new(emitter.clone());
        let lifecycle = LifecycleController::new(
            api,
            store,
            connection.clone(),
            emitter.clone(),
            sources.clone(),
            replay.clone(),
        );

        debug!(target: "recordroom::startup", "Recorder built for {}", self.config.api_base);
        Ok(Recorder {
            inner: Arc::new(RecorderInner {
                config: self.config,
                emitter,
                connection,
                sources,
                replay,
                lifecycle,
            }),
        })
    }
}

impl Recorder {
    /// Recorder with the HTTP backend client and WebSocket transport.
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        RecorderBuilder::new(config.clone()).build()
    }

    pub fn builder(config: RecorderConfig) -> RecorderBuilder {
        RecorderBuilder::new(config)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    /// Attach to the known record or create one, then begin capturing.
    pub async fn start(&self) -> Result<RecorderState> {
        let record = self.inner.lifecycle.start(&self.inner.config).await?;
        info!(target: "recordroom::lifecycle", "Recording into {}", record.share_url);
        Ok(self.state())
    }

    /// Begin a new record chained to the current one.
    pub async fn new_record(&self) -> Result<RecorderState> {
        let record = self.inner.lifecycle.new_record(&self.inner.config).await?;
        info!(target: "recordroom::lifecycle", "Recording into {}", record.share_url);
        Ok(self.state())
    }

    pub fn state(&self) -> RecorderState {
        let LifecycleStatus {
            state,
            session_id,
            record,
        } = self.inner.lifecycle.status();
        let record = record.as_ref();
        RecorderState {
            record_id: record.map(|r| r.record_id.clone()),
            session_id,
            previous_record_id: record.and_then(|r| r.previous_record_id.clone()),
            share_url: record.map(|r| r.share_url.clone()),
            ingest_ws_url: record.map(|r| r.ingest_ws_url.clone()),
            lifecycle: state,
            connection: self.inner.connection.state(),
            queued: self.inner.emitter.queue().len(),
        }
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleStatus> {
        self.inner.lifecycle.subscribe()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe_state()
    }

    /// True once a record is active, including while `new_record` creates its successor.
    fn has_record(&self) -> bool {
        self.inner.lifecycle.status().record.is_some()
    }

    /// Emit a payload built by the host. Dropped until a record is attached.
    pub fn emit(&self, payload: EventPayload) -> Option<u64> {
        if !self.has_record() {
            return None;
        }
        self.inner.emitter.emit(payload)
    }

    /// Emit a custom breadcrumb.
    pub fn breadcrumb(
        &self,
        name: impl Into<String>,
        message: impl Into<String>,
        data: Map<String, Value>,
    ) -> Option<u64> {
        self.emit(EventPayload::Breadcrumb(BreadcrumbPayload {
            name: name.into(),
            message: message.into(),
            data,
        }))
    }

    pub fn console(&self) -> &ConsoleCapture {
        self.inner.sources.console()
    }

    /// Layer to compose into the host's tracing subscriber.
    pub fn console_layer(&self) -> ConsoleLayer {
        self.inner.sources.console().layer()
    }

    pub fn network(&self) -> &NetworkCapture {
        self.inner.sources.network()
    }

    pub fn breadcrumbs(&self) -> &BreadcrumbCapture {
        self.inner.sources.breadcrumbs()
    }

    pub fn replay(&self) -> &ReplayRecorder {
        &self.inner.replay
    }

    /// Wrap a client so every request it executes is captured.
    pub fn http_client(&self, client: reqwest::Client) -> InstrumentedClient {
        self.inner.sources.network().instrument(client)
    }

    /// Push pending replay frames and wait for the queue to drain.
    ///
    /// Returns whether everything was handed to the transport within `timeout`.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.inner.replay.flush();
        self.inner.connection.wake();
        let drained = self.inner.emitter.queue().wait_until_empty(timeout).await;
        if !drained {
            debug!(
                target: "recordroom::queue",
                "Flush timed out with {} events queued",
                self.inner.emitter.queue().len()
            );
        }
        drained
    }

    /// Uninstall capture, stop the replay timer and close the transport.
    pub async fn shutdown(&self) {
        self.inner.sources.uninstall_all();
        self.inner.replay.stop();
        self.inner.connection.shutdown().await;
        info!(target: "recordroom::lifecycle", "Recorder shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::transport::memory::MemoryConnector;
    use crate::RecordroomError;
    use async_trait::async_trait;
    use recordroom_types::{
        CreateRecordRequest, CreateRecordResponse, EventKind, LifecycleState, RecordLookup,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingApi {
        created: AtomicUsize,
        /// Delay applied to every create after the first.
        later_create_delay: Option<Duration>,
    }

    #[async_trait]
    impl RecordApi for CountingApi {
        async fn create_record(
            &self,
            _endpoint: &Endpoint,
            _request: &CreateRecordRequest,
        ) -> Result<CreateRecordResponse> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            if n > 1 {
                if let Some(delay) = self.later_create_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(CreateRecordResponse {
                record_id: format!("r-{}", n),
                share_url: None,
                ingest_ws_url: None,
                previous_record_id: None,
            })
        }

        async fn get_record(&self, _endpoint: &Endpoint, record_id: &str) -> Result<RecordLookup> {
            Err(RecordroomError::RecordNotFound(record_id.to_string()))
        }
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            patch_console: false,
            patch_replay: false,
            ..RecorderConfig::new("http://localhost:8080")
        }
    }

    fn recorder(connector: &MemoryConnector) -> Recorder {
        recorder_with_api(connector, CountingApi::default())
    }

    fn recorder_with_api(connector: &MemoryConnector, api: CountingApi) -> Recorder {
        Recorder::builder(config())
            .with_api(Arc::new(api))
            .with_connector(Arc::new(connector.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_state_before_start() {
        let recorder = recorder(&MemoryConnector::new());
        let state = recorder.state();
        assert_eq!(state.lifecycle, LifecycleState::Idle);
        assert_eq!(state.connection, ConnectionState::Closed);
        assert!(state.record_id.is_none());
        assert_eq!(state.queued, 0);
    }

    #[tokio::test]
    async fn test_emit_before_attach_is_dropped() {
        let recorder = recorder(&MemoryConnector::new());
        assert!(recorder
            .breadcrumb("custom", "too early", Map::new())
            .is_none());
        assert_eq!(recorder.state().queued, 0);
    }

    #[tokio::test]
    async fn test_start_reports_urls() {
        let recorder = recorder(&MemoryConnector::new());
        let state = recorder.start().await.unwrap();
        assert_eq!(state.record_id.as_deref(), Some("r-1"));
        assert_eq!(
            state.share_url.as_deref(),
            Some("http://localhost:8080/r/r-1/timeline")
        );
        assert_eq!(
            state.ingest_ws_url.as_deref(),
            Some("ws://localhost:8080/ws/ingest?recordId=r-1")
        );
        assert_eq!(state.lifecycle, LifecycleState::Attached);
        assert!(state.session_id.is_some());
    }

    #[tokio::test]
    async fn test_breadcrumbs_reach_transport_in_order() {
        let connector = MemoryConnector::new();
        let recorder = recorder(&connector);
        recorder.start().await.unwrap();

        let first = recorder.breadcrumb("custom", "one", Map::new()).unwrap();
        let second = recorder.breadcrumb("custom", "two", Map::new()).unwrap();
        assert_eq!(second, first + 1);

        assert!(recorder.flush(Duration::from_secs(2)).await);
        let events = connector.events();
        let messages: Vec<_> = events
            .iter()
            .filter(|e| e["name"] == "custom")
            .map(|e| e["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert!(events.iter().all(|e| e["type"] == EventKind::Breadcrumb.as_str()));
    }

    #[tokio::test]
    async fn test_new_record_moves_stream() {
        let connector = MemoryConnector::new();
        let recorder = recorder(&connector);
        recorder.start().await.unwrap();

        let state = recorder.new_record().await.unwrap();
        assert_eq!(state.record_id.as_deref(), Some("r-2"));
        assert_eq!(state.previous_record_id.as_deref(), Some("r-1"));

        recorder.breadcrumb("custom", "after", Map::new());
        assert!(recorder.flush(Duration::from_secs(2)).await);
        let last = connector.frames().pop().unwrap();
        assert!(last.url.ends_with("recordId=r-2"));
    }

    #[tokio::test]
    async fn test_emit_while_new_record_is_creating() {
        let connector = MemoryConnector::new();
        let recorder = recorder_with_api(
            &connector,
            CountingApi {
                later_create_delay: Some(Duration::from_millis(200)),
                ..CountingApi::default()
            },
        );
        recorder.start().await.unwrap();

        let switching = tokio::spawn({
            let recorder = recorder.clone();
            async move { recorder.new_record().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.state().lifecycle, LifecycleState::Creating);

        let seq = recorder.breadcrumb("custom", "during switch", Map::new());
        assert!(seq.is_some());

        let state = switching.await.unwrap().unwrap();
        assert_eq!(state.record_id.as_deref(), Some("r-2"));
        assert!(recorder.flush(Duration::from_secs(2)).await);
        assert!(connector
            .events()
            .iter()
            .any(|e| e["message"] == "during switch"));
    }

    #[tokio::test]
    async fn test_flush_times_out_without_transport() {
        let connector = MemoryConnector::new();
        connector.set_refuse(true);
        let recorder = recorder(&connector);
        recorder.start().await.unwrap();
        recorder.breadcrumb("custom", "stuck", Map::new());

        assert!(!recorder.flush(Duration::from_millis(50)).await);
        assert!(recorder.state().queued > 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_uninstalls() {
        let recorder = recorder(&MemoryConnector::new());
        recorder.start().await.unwrap();
        assert!(recorder.network().is_installed());

        recorder.shutdown().await;
        assert!(!recorder.network().is_installed());
        assert_eq!(recorder.state().connection, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_subscribe_lifecycle_sees_attach() {
        let recorder = recorder(&MemoryConnector::new());
        let mut status = recorder.subscribe_lifecycle();
        recorder.start().await.unwrap();
        let attached = status
            .wait_for(|s| s.state == LifecycleState::Attached)
            .await
            .unwrap()
            .clone();
        assert_eq!(attached.record.unwrap().record_id, "r-1");
    }
}
