//! Agent configuration.

use anyhow::Result;
use recordroom_core::RecorderConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Recorder settings, under `[recorder]`.
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// How long to wait for queued events at end of input.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Copy piped input to stdout.
    #[serde(default = "default_echo")]
    pub echo: bool,
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

fn default_echo() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recordroom")
        .join("state.db")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recorder: RecorderConfig::default(),
            flush_timeout_ms: default_flush_timeout_ms(),
            echo: default_echo(),
        }
    }
}

impl AgentConfig {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config.with_default_storage())
    }

    /// Load config from `config/recordroom.toml` or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/recordroom.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Self::default().with_default_storage())
    }

    /// Persist identity under the user's data directory unless a path was set.
    fn with_default_storage(mut self) -> Self {
        if self.recorder.storage_path.is_none() {
            self.recorder.storage_path = Some(default_storage_path());
        }
        self
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
