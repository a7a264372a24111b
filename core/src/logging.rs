//! Structured logging setup for hosts embedding the core.
//!
//! The library itself only emits `tracing` events. A host calls
//! [`init_from_config`] once at startup; `RUST_LOG` overrides the configured
//! level when set.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

use crate::config::SurveyConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured output for development.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, for log shipping off the device.
    Json,
}

impl LogFormat {
    /// Colour is only useful for the human-readable formats.
    pub fn supports_ansi(self) -> bool {
        !matches!(self, LogFormat::Json)
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub with_file_and_line: bool,
    pub with_ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_file_and_line: true,
            with_ansi: true,
        }
    }
}

impl LogSettings {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_config(config: &SurveyConfig) -> Result<Self, ConfigError> {
        let level = parse_level(&config.logging.level).map_err(ConfigError::Invalid)?;
        Ok(Self::new(level)
            .with_format(config.logging.format)
            .with_ansi(config.logging.ansi))
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self.with_ansi &= format.supports_ansi();
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled && self.format.supports_ansi();
        self
    }
}

pub fn init_from_config(config: &SurveyConfig) -> Result<(), ConfigError> {
    init(LogSettings::from_config(config)?)
}

/// Install the global subscriber. Calling it again after a subscriber is
/// already installed is a no-op.
pub fn init(settings: LogSettings) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str().to_lowercase()));

    let result = match settings.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(settings.with_file_and_line)
                    .with_line_number(settings.with_file_and_line)
                    .with_ansi(settings.with_ansi)
                    .with_filter(filter),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_file(settings.with_file_and_line)
                    .with_line_number(settings.with_file_and_line)
                    .with_ansi(settings.with_ansi)
                    .with_filter(filter),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_file(settings.with_file_and_line)
                    .with_line_number(settings.with_file_and_line)
                    .with_filter(filter),
            )
            .try_init(),
    };
    already_set_is_ok(result)
}

fn already_set_is_ok(result: Result<(), TryInitError>) -> Result<(), ConfigError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("has already been set") => Ok(()),
        Err(e) => Err(ConfigError::Invalid(format!("failed to initialize logging: {e}"))),
    }
}

pub fn parse_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "invalid log level '{level}', expected one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Ok(Level::DEBUG));
        assert_eq!(parse_level("WARN"), Ok(Level::WARN));
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = SurveyConfig::default();
        config.logging.level = "error".to_string();
        config.logging.format = LogFormat::Json;

        let settings = LogSettings::from_config(&config).unwrap();
        assert_eq!(settings.level, Level::ERROR);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(!settings.with_ansi);

        config.logging.level = "chatty".to_string();
        assert!(matches!(
            LogSettings::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_compact_keeps_ansi_setting() {
        let mut config = SurveyConfig::default();
        config.logging.format = LogFormat::Compact;
        assert!(LogSettings::from_config(&config).unwrap().with_ansi);

        config.logging.ansi = false;
        assert!(!LogSettings::from_config(&config).unwrap().with_ansi);

        let settings = LogSettings::new(Level::WARN)
            .with_format(LogFormat::Compact)
            .with_ansi(false);
        assert_eq!(settings.level, Level::WARN);
        assert!(!settings.with_ansi);
    }

    #[test]
    fn test_format_names() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
        assert_eq!(serde_json::to_string(&LogFormat::Pretty).unwrap(), "\"pretty\"");
    }
}
