//! Record identity and the backend's record-management payloads.

use serde::{Deserialize, Serialize};

/// Body of `POST {base}/api/records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub page_url: String,
    pub user_agent: String,
    pub app_version: String,
    pub session_id: String,
    pub previous_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// Response of `POST {base}/api/records`. URLs may be omitted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordResponse {
    pub record_id: String,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub ingest_ws_url: Option<String>,
    #[serde(default)]
    pub previous_record_id: Option<String>,
}

/// Response of `GET {base}/api/records/{recordId}`.
///
/// Only the predecessor pointer is used; a successful response is itself the
/// confirmation that the record exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordLookup {
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub previous_record_id: Option<String>,
    #[serde(default)]
    pub created_at_epoch_ms: Option<i64>,
}

/// The active record. Replaced wholesale when a new record begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_id: String,
    pub previous_record_id: Option<String>,
    pub share_url: String,
    pub ingest_ws_url: String,
}
