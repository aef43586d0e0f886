//! Logging setup and the server lifecycle events.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::parse_bool;

pub const ENV_LOG_LEVEL: &str = "PREDICTOR_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "PREDICTOR_LOG_FORMAT";
pub const ENV_LOG_TARGET: &str = "PREDICTOR_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            let trimmed = level.trim();
            if !trimmed.is_empty() {
                config.level = trimmed.to_string();
            }
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT).and_then(|raw| parse_log_format(&raw)) {
            config.format = format;
        }
        if let Some(include_target) = lookup(ENV_LOG_TARGET).and_then(|raw| parse_bool(&raw)) {
            config.include_target = include_target;
        }

        config
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    LoggingConfig::from_lookup(|key| env::var(key).ok())
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "dashboard_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "dashboard_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/"
    );
}

/// `base_url` is `None` for the in-memory demo backend.
pub fn log_backend_selected(backend: &str, base_url: Option<&str>, timeout_ms: u64) {
    match base_url {
        Some(base_url) => info!(
            component = "dashboard_server",
            event = "backend.selected",
            backend,
            base_url,
            timeout_ms
        ),
        None => info!(
            component = "dashboard_server",
            event = "backend.selected",
            backend
        ),
    }
}

pub fn log_cookie_key(generated: bool) {
    if generated {
        warn!(
            component = "dashboard_server",
            event = "cookie_key.generated",
            detail = "saved logins will not survive a restart"
        );
    } else {
        info!(
            component = "dashboard_server",
            event = "cookie_key.configured"
        );
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig::from_lookup(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        })
    }

    #[test]
    fn defaults_when_env_missing() {
        assert_eq!(config_from(&[]), LoggingConfig::default());
    }

    #[test]
    fn parses_json_and_level_and_target() {
        let cfg = config_from(&[
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "JSON"),
            (ENV_LOG_TARGET, "false"),
        ]);

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn invalid_format_or_target_falls_back_to_defaults() {
        let cfg = config_from(&[
            (ENV_LOG_LEVEL, "  "),
            (ENV_LOG_FORMAT, "yaml"),
            (ENV_LOG_TARGET, "maybe"),
        ]);

        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }
}
