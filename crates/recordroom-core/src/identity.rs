//! Session and candidate-record resolution.
//!
//! Pure storage work: no network calls. Storage read failures are treated as
//! "absent" and write failures are logged, matching how the rest of the core
//! treats persisted state as best-effort.

use crate::config::RecorderConfig;
use crate::storage::StateStore;
use tracing::warn;
use uuid::Uuid;

/// Result of [`resolve_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub session_id: String,
    /// Record to try attaching to, if any.
    pub candidate_record_id: Option<String>,
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn read_key(store: &dyn StateStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => non_blank(value),
        Err(e) => {
            warn!(target: "recordroom::storage", "Failed to read '{}': {}", key, e);
            None
        }
    }
}

pub(crate) fn write_key(store: &dyn StateStore, key: &str, value: &str) {
    if let Err(e) = store.set(key, value) {
        warn!(target: "recordroom::storage", "Failed to persist '{}': {}", key, e);
    }
}

/// Read the session id, generating and persisting one when absent or blank.
pub fn ensure_session_id(config: &RecorderConfig, store: &dyn StateStore) -> String {
    match read_key(store, &config.session_id_key) {
        Some(existing) => existing,
        None => {
            let fresh = Uuid::new_v4().to_string();
            write_key(store, &config.session_id_key, &fresh);
            fresh
        }
    }
}

/// Last record id persisted for this storage scope.
pub fn stored_record_id(config: &RecorderConfig, store: &dyn StateStore) -> Option<String> {
    read_key(store, &config.record_id_key)
}

/// Resolve the session id and the record to try attaching to.
///
/// An explicit `record_id` wins; otherwise the persisted one is used when
/// `reuse_record_in_session` is on.
pub fn resolve_identity(config: &RecorderConfig, store: &dyn StateStore) -> Identity {
    let session_id = ensure_session_id(config, store);

    let candidate_record_id = match non_blank(config.record_id.clone()) {
        Some(explicit) => Some(explicit),
        None if config.reuse_record_in_session => stored_record_id(config, store),
        None => None,
    };

    Identity {
        session_id,
        candidate_record_id,
    }
}
