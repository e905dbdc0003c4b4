//! Recorder configuration.

use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    /// Backend base URL, e.g. `http://localhost:8080`.
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,

    #[serde(default = "default_session_id_key")]
    pub session_id_key: String,
    #[serde(default = "default_record_id_key")]
    pub record_id_key: String,
    /// Explicit record to attach to. Takes precedence over storage.
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default = "default_true")]
    pub reuse_record_in_session: bool,
    #[serde(default = "default_true")]
    pub auto_create_record: bool,

    #[serde(default = "default_true")]
    pub patch_console: bool,
    #[serde(default = "default_true")]
    pub patch_network: bool,
    #[serde(default = "default_true")]
    pub patch_breadcrumb: bool,
    #[serde(default = "default_true")]
    pub patch_replay: bool,

    #[serde(default = "default_replay_flush_interval_ms")]
    pub replay_flush_interval_ms: u64,
    #[serde(default = "default_replay_max_batch")]
    pub replay_max_batch: usize,
    /// Lifetime frame cap per record; 0 disables the cap.
    #[serde(default = "default_replay_max_total_events")]
    pub replay_max_total_events: usize,

    #[serde(default = "default_max_body")]
    pub max_body: usize,
    #[serde(default = "default_max_input")]
    pub max_input: usize,
    #[serde(default = "default_true")]
    pub mask_password: bool,

    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,

    /// Fraction of network events kept, 0.0 to 1.0.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_remove_headers")]
    pub remove_headers: Vec<String>,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// SQLite file for persisted identity. In-memory when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub device_info: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_app_version() -> String {
    "0.5.0".to_string()
}

fn default_session_id_key() -> String {
    "rr_sessionId".to_string()
}

fn default_record_id_key() -> String {
    "rr_currentRecordId".to_string()
}

fn default_replay_flush_interval_ms() -> u64 {
    2000
}

fn default_replay_max_batch() -> usize {
    40
}

fn default_replay_max_total_events() -> usize {
    6000
}

fn default_max_body() -> usize {
    20_000
}

fn default_max_input() -> usize {
    200
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_remove_headers() -> Vec<String> {
    [
        "authorization",
        "cookie",
        "api-key",
        "auth-token",
        "x-api-key",
        "x-auth-token",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            app_version: default_app_version(),
            session_id_key: default_session_id_key(),
            record_id_key: default_record_id_key(),
            record_id: None,
            reuse_record_in_session: true,
            auto_create_record: true,
            patch_console: true,
            patch_network: true,
            patch_breadcrumb: true,
            patch_replay: true,
            replay_flush_interval_ms: default_replay_flush_interval_ms(),
            replay_max_batch: default_replay_max_batch(),
            replay_max_total_events: default_replay_max_total_events(),
            max_body: default_max_body(),
            max_input: default_max_input(),
            mask_password: true,
            user_id: None,
            user_email: None,
            sample_rate: default_sample_rate(),
            remove_headers: default_remove_headers(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            storage_path: None,
            page_url: None,
            user_agent: None,
            device_info: None,
        }
    }
}

impl RecorderConfig {
    /// Defaults pointed at the given backend.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn replay_flush_interval(&self) -> Duration {
        Duration::from_millis(self.replay_flush_interval_ms.max(1))
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!(
                "recordroom/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        })
    }

    pub fn device_info(&self) -> String {
        if let Some(info) = &self.device_info {
            return info.clone();
        }
        let mut parts = vec![
            format!("platform={}", std::env::consts::OS),
            format!("arch={}", std::env::consts::ARCH),
        ];
        if let Ok(parallelism) = std::thread::available_parallelism() {
            parts.push(format!("cpus={}", parallelism));
        }
        parts.join(" | ")
    }
}
