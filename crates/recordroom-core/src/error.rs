//! Error types for Recordroom.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordroomError {
    #[error("apiBase is required")]
    MissingEndpoint,

    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("No record id is known and auto-create is disabled")]
    AutoCreateDisabled,

    #[error("createRecord failed: {status} {body}")]
    CreateFailed { status: u16, body: String },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Another record transition is already in flight")]
    LifecycleBusy,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),
}

impl RecordroomError {
    /// Configuration errors are fatal to the call and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RecordroomError::MissingEndpoint
                | RecordroomError::InvalidEndpoint { .. }
                | RecordroomError::AutoCreateDisabled
                | RecordroomError::ConfigError(_)
        )
    }
}
