//! Logging configuration and initialization.
//!
//! Presets (production, verbose, debug, trace, quiet), per-target overrides
//! from the command line, JSON output and `RUST_LOG` fallback. Log lines go to
//! stderr so stdout stays a clean passthrough of the piped input.

use recordroom_core::ConsoleLayer;
use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

/// Logging preset levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Lifecycle milestones and problems only
    #[default]
    Production,
    /// Connection state changes too
    Verbose,
    Debug,
    /// Everything, including per-event queue traffic
    Trace,
    /// Warnings and errors only
    Quiet,
}

/// Logging configuration built from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target level overrides (e.g., "recordroom::transport" -> DEBUG)
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // "target=level", comma-separated or repeated
        let mut overrides = HashMap::new();
        for override_str in log_overrides {
            for part in override_str.split(',') {
                if let Some((target, level_str)) = part.split_once('=') {
                    let target = target.trim();
                    let full_target = if target.starts_with("recordroom") {
                        target.to_string()
                    } else {
                        format!("recordroom::{}", target)
                    };

                    if let Ok(level) = parse_level(level_str.trim()) {
                        overrides.insert(full_target, level);
                    }
                }
            }
        }

        Self {
            preset,
            overrides,
            format,
        }
    }

    /// Build an EnvFilter from this configuration. `RUST_LOG` wins when set.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }

        let mut directives: Vec<String> = match self.preset {
            LogPreset::Production => vec![
                "recordroom::startup=info".into(),
                "recordroom::lifecycle=info".into(),
                "recordroom::transport=warn".into(),
                "recordroom::queue=warn".into(),
                "recordroom::capture=warn".into(),
                "recordroom::replay=warn".into(),
                "recordroom::storage=warn".into(),
                "recordroom_agent=info".into(),
            ],
            LogPreset::Verbose => vec![
                "recordroom=info".into(),
                "recordroom::transport=debug".into(),
                "recordroom_agent=info".into(),
            ],
            LogPreset::Debug => vec![
                "recordroom=debug".into(),
                "recordroom::queue=info".into(),
                "recordroom_agent=debug".into(),
            ],
            LogPreset::Trace => vec![
                "recordroom=trace".into(),
                "recordroom_agent=trace".into(),
                "tokio_tungstenite=debug".into(),
            ],
            LogPreset::Quiet => vec!["recordroom=warn".into(), "recordroom_agent=warn".into()],
        };

        for (target, level) in &self.overrides {
            directives.push(format!("{}={}", target, level_to_str(*level)));
        }

        let filter_str = directives.join(",");
        EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Parse a level string (case-insensitive).
fn parse_level(s: &str) -> Result<Level, ()> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(()),
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Initialize the global subscriber.
///
/// `console` is the recorder's capture layer; it sees every event that passes
/// the filter and keeps only those from outside the recorder itself.
pub fn init(config: &LogConfig, console: Option<ConsoleLayer>) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .with(console)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .with(console)
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_config_from_cli_preset_priority() {
        let config = LogConfig::from_cli(true, true, true, true, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Quiet);

        let config = LogConfig::from_cli(true, true, true, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Trace);

        let config = LogConfig::from_cli(true, true, false, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Debug);

        let config = LogConfig::from_cli(true, false, false, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Verbose);

        let config = LogConfig::from_cli(false, false, false, false, vec![], LogFormat::Text);
        assert_eq!(config.preset, LogPreset::Production);
    }

    #[test]
    fn test_overrides_are_prefixed() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec!["transport=debug".into(), "queue=trace,capture=warning".into()],
            LogFormat::Text,
        );

        assert_eq!(config.overrides.get("recordroom::transport"), Some(&Level::DEBUG));
        assert_eq!(config.overrides.get("recordroom::queue"), Some(&Level::TRACE));
        assert_eq!(config.overrides.get("recordroom::capture"), Some(&Level::WARN));
    }

    #[test]
    fn test_full_targets_pass_through() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec!["recordroom::lifecycle=trace".into(), "recordroom_agent=debug".into()],
            LogFormat::Text,
        );

        assert_eq!(config.overrides.get("recordroom::lifecycle"), Some(&Level::TRACE));
        assert_eq!(config.overrides.get("recordroom_agent"), Some(&Level::DEBUG));
    }

    #[test]
    fn test_bad_level_is_skipped() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec!["transport=loud".into()],
            LogFormat::Text,
        );
        assert!(config.overrides.is_empty());
    }
}
