//! Record lifecycle controller.
//!
//! Decides between attaching to a known record and creating a new one, then
//! re-points the connection manager, installs capture sources and restarts
//! the stream counters for the record that became active.
//!
//! Only one transition runs at a time: a `start` or `new_record` arriving while
//! another is in flight is rejected with [`RecordroomError::LifecycleBusy`].

use crate::backend::RecordApi;
use crate::capture::CaptureSources;
use crate::config::RecorderConfig;
use crate::connection::ConnectionManager;
use crate::emitter::Emitter;
use crate::endpoint::Endpoint;
use crate::identity::{ensure_session_id, non_blank, resolve_identity, stored_record_id, write_key};
use crate::redaction::RedactionFilter;
use crate::replay::ReplayRecorder;
use crate::storage::StateStore;
use crate::{RecordroomError, Result};
use recordroom_types::{
    BreadcrumbPayload, CreateRecordRequest, CreateRecordResponse, EventPayload, LifecycleState,
    Record,
};
use serde_json::{json, Map};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Lifecycle state plus the record and session it refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub session_id: Option<String>,
    pub record: Option<Record>,
}

pub struct LifecycleController {
    api: Arc<dyn RecordApi>,
    store: Arc<dyn StateStore>,
    connection: Arc<ConnectionManager>,
    emitter: Emitter,
    sources: Arc<CaptureSources>,
    replay: ReplayRecorder,
    /// Held for the whole of one transition.
    in_flight: Mutex<()>,
    status: watch::Sender<LifecycleStatus>,
}

impl LifecycleController {
    pub fn new(
        api: Arc<dyn RecordApi>,
        store: Arc<dyn StateStore>,
        connection: Arc<ConnectionManager>,
        emitter: Emitter,
        sources: Arc<CaptureSources>,
        replay: ReplayRecorder,
    ) -> Self {
        let (status, _) = watch::channel(LifecycleStatus::default());
        Self {
            api,
            store,
            connection,
            emitter,
            sources,
            replay,
            in_flight: Mutex::new(()),
            status,
        }
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.subscribe()
    }

    pub fn current_record(&self) -> Option<Record> {
        self.status.borrow().record.clone()
    }

    /// Attach to the known record or create one, and begin capturing into it.
    ///
    /// When a record is already attached it is returned unchanged.
    pub async fn start(&self, config: &RecorderConfig) -> Result<Record> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| RecordroomError::LifecycleBusy)?;
        let endpoint = self.endpoint(config)?;

        if let Some(record) = self.current_record() {
            return Ok(record);
        }
        self.start_locked(config, &endpoint).await
    }

    /// Replace the active record with a new one chained to it.
    ///
    /// Without an active record this is [`start`](Self::start). If creating
    /// the new record fails the current one stays attached.
    pub async fn new_record(&self, config: &RecorderConfig) -> Result<Record> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| RecordroomError::LifecycleBusy)?;
        let endpoint = self.endpoint(config)?;

        let Some(current) = self.current_record() else {
            return self.start_locked(config, &endpoint).await;
        };

        let session_id = ensure_session_id(config, self.store.as_ref());
        let record = match self
            .create(config, &endpoint, &session_id, Some(current.record_id.clone()))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    target: "recordroom::lifecycle",
                    "Failed to create a record after {}: {}", current.record_id, e
                );
                self.set_state(LifecycleState::Attached);
                return Err(e);
            }
        };

        // Old transport goes first; events queued from here on wait for the new one.
        self.connection.clear();
        self.status.send_modify(|status| status.record = None);
        self.apply_record(config, &endpoint, record.clone());
        Ok(record)
    }

    fn endpoint(&self, config: &RecorderConfig) -> Result<Endpoint> {
        Endpoint::parse(&config.api_base).inspect_err(|_| self.set_state(LifecycleState::Failed))
    }

    async fn start_locked(&self, config: &RecorderConfig, endpoint: &Endpoint) -> Result<Record> {
        self.set_state(LifecycleState::Resolving);
        let identity = resolve_identity(config, self.store.as_ref());
        let session_id = identity.session_id.clone();
        self.status
            .send_modify(|status| status.session_id = Some(session_id.clone()));

        let record = match identity.candidate_record_id {
            Some(candidate) => match self.attach(endpoint, &candidate).await {
                Ok(record) => record,
                Err(e) => {
                    info!(
                        target: "recordroom::lifecycle",
                        "Cannot attach to record {}: {}; creating a new one", candidate, e
                    );
                    self.create_or_fail(config, endpoint, &session_id, None).await?
                }
            },
            None => {
                if !config.auto_create_record {
                    self.set_state(LifecycleState::Failed);
                    return Err(RecordroomError::AutoCreateDisabled);
                }
                let previous = stored_record_id(config, self.store.as_ref());
                self.create_or_fail(config, endpoint, &session_id, previous)
                    .await?
            }
        };

        self.apply_record(config, endpoint, record.clone());
        Ok(record)
    }

    async fn attach(&self, endpoint: &Endpoint, record_id: &str) -> Result<Record> {
        let lookup = self.api.get_record(endpoint, record_id).await?;
        Ok(Record {
            record_id: record_id.to_string(),
            previous_record_id: non_blank(lookup.previous_record_id),
            share_url: endpoint.share_url(record_id),
            ingest_ws_url: endpoint.ingest_url(record_id),
        })
    }

    async fn create_or_fail(
        &self,
        config: &RecorderConfig,
        endpoint: &Endpoint,
        session_id: &str,
        previous: Option<String>,
    ) -> Result<Record> {
        self.create(config, endpoint, session_id, previous)
            .await
            .inspect_err(|e| {
                warn!(target: "recordroom::lifecycle", "Failed to create record: {}", e);
                self.set_state(LifecycleState::Failed);
            })
    }

    async fn create(
        &self,
        config: &RecorderConfig,
        endpoint: &Endpoint,
        session_id: &str,
        previous: Option<String>,
    ) -> Result<Record> {
        self.set_state(LifecycleState::Creating);
        let request = CreateRecordRequest {
            page_url: config.page_url.clone().unwrap_or_default(),
            user_agent: config.user_agent(),
            app_version: config.app_version.clone(),
            session_id: session_id.to_string(),
            previous_record_id: previous.clone(),
            device_info: Some(config.device_info()),
            user_id: non_blank(config.user_id.clone()),
            user_email: non_blank(config.user_email.clone()),
        };

        let created = self.api.create_record(endpoint, &request).await?;
        record_from_response(endpoint, created, previous)
    }

    /// Make `record` the active one. Runs without suspending.
    fn apply_record(&self, config: &RecorderConfig, endpoint: &Endpoint, record: Record) {
        write_key(self.store.as_ref(), &config.record_id_key, &record.record_id);

        self.emitter
            .set_filter(RedactionFilter::new(config, Some(endpoint.clone())));
        self.connection.set_reconnect_delay(config.reconnect_delay());
        self.connection.ensure_open(&record.ingest_ws_url);
        self.sources.ensure_installed(config);
        self.emitter.reset();

        self.status.send_modify(|status| {
            status.state = LifecycleState::Attached;
            status.record = Some(record.clone());
        });
        info!(
            target: "recordroom::lifecycle",
            "Attached to record {} (previous: {:?})",
            record.record_id,
            record.previous_record_id
        );

        let mut data = Map::new();
        data.insert("recordId".to_string(), json!(record.record_id));
        data.insert("shareUrl".to_string(), json!(record.share_url));
        data.insert("appVersion".to_string(), json!(config.app_version));
        self.emitter.emit(EventPayload::Breadcrumb(BreadcrumbPayload {
            name: "lifecycle".to_string(),
            message: "recordroom attached".to_string(),
            data,
        }));

        if config.patch_replay {
            self.replay.restart(config);
        } else {
            self.replay.stop();
        }
    }

    fn set_state(&self, state: LifecycleState) {
        self.status.send_modify(|status| status.state = state);
    }
}

/// Build a [`Record`] from a create response, deriving URLs the backend left out.
fn record_from_response(
    endpoint: &Endpoint,
    created: CreateRecordResponse,
    previous: Option<String>,
) -> Result<Record> {
    let Some(record_id) = non_blank(Some(created.record_id)) else {
        return Err(RecordroomError::CreateFailed {
            status: 200,
            body: "response has no recordId".to_string(),
        });
    };

    Ok(Record {
        previous_record_id: non_blank(created.previous_record_id).or(previous),
        share_url: non_blank(created.share_url).unwrap_or_else(|| endpoint.share_url(&record_id)),
        ingest_ws_url: non_blank(created.ingest_ws_url)
            .unwrap_or_else(|| endpoint.ingest_url(&record_id)),
        record_id,
    })
}
