//! Application configuration read from the process environment.

use std::env;
use std::net::SocketAddr;

use reqwest::Url;
use thiserror::Error;
use tracing::warn;

use crate::auth_store::CookieSettings;
use crate::backend::{HttpBackendConfig, DEFAULT_API_URL};

pub const ENV_API_URL: &str = "PREDICTOR_API_URL";
pub const ENV_HTTP_TIMEOUT_MS: &str = "PREDICTOR_HTTP_TIMEOUT_MS";
pub const ENV_DASHBOARD_ADDR: &str = "PREDICTOR_DASHBOARD_ADDR";
pub const ENV_COOKIE_SECRET: &str = "PREDICTOR_COOKIE_SECRET";
pub const ENV_COOKIE_PREFIX: &str = "PREDICTOR_COOKIE_PREFIX";
pub const ENV_LOGIN_DAYS: &str = "PREDICTOR_LOGIN_DAYS";
pub const ENV_AUTO_REFRESH_SECS: &str = "PREDICTOR_AUTO_REFRESH_SECS";
pub const ENV_USE_DEMO: &str = "PREDICTOR_USE_DEMO";
pub const ENV_SESSION_IDLE_SECS: &str = "PREDICTOR_SESSION_IDLE_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_url: String,
    pub http_timeout_ms: u64,
    pub bind_addr: SocketAddr,
    pub cookie_secret: Option<String>,
    pub cookie: CookieSettings,
    pub auto_refresh_secs: u64,
    pub session_idle_secs: u64,
    pub use_demo_backend: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            http_timeout_ms: 10_000,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8501)),
            cookie_secret: None,
            cookie: CookieSettings::default(),
            auto_refresh_secs: 60,
            session_idle_secs: 24 * 60 * 60,
            use_demo_backend: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PREDICTOR_API_URL is not a usable http(s) URL: {0}")]
    InvalidApiUrl(String),
    #[error("PREDICTOR_DASHBOARD_ADDR is not a socket address: {0}")]
    InvalidBindAddr(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(url) = read(ENV_API_URL) {
            config.api_url = validate_api_url(&url)?;
        }

        if let Some(raw) = read(ENV_DASHBOARD_ADDR) {
            config.bind_addr = raw
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(raw.clone()))?;
        }

        if let Some(raw) = read(ENV_HTTP_TIMEOUT_MS) {
            config.http_timeout_ms =
                parse_positive(ENV_HTTP_TIMEOUT_MS, &raw).unwrap_or(config.http_timeout_ms);
        }

        if let Some(raw) = read(ENV_LOGIN_DAYS) {
            config.cookie.max_age_days = parse_positive(ENV_LOGIN_DAYS, &raw)
                .and_then(|days| i64::try_from(days).ok())
                .unwrap_or(config.cookie.max_age_days);
        }

        if let Some(raw) = read(ENV_AUTO_REFRESH_SECS) {
            config.auto_refresh_secs =
                parse_positive(ENV_AUTO_REFRESH_SECS, &raw).unwrap_or(config.auto_refresh_secs);
        }

        if let Some(raw) = read(ENV_SESSION_IDLE_SECS) {
            config.session_idle_secs = parse_positive(ENV_SESSION_IDLE_SECS, &raw)
                .unwrap_or(config.session_idle_secs);
        }

        if let Some(prefix) = read(ENV_COOKIE_PREFIX) {
            if prefix
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
            {
                config.cookie.prefix = prefix;
            } else {
                warn!(
                    component = "config",
                    event = "config.invalid_value",
                    key = ENV_COOKIE_PREFIX,
                    value = %prefix
                );
            }
        }

        config.cookie_secret = read(ENV_COOKIE_SECRET);
        config.use_demo_backend = read(ENV_USE_DEMO)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(false);

        Ok(config)
    }

    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.api_url.clone(),
            timeout_ms: self.http_timeout_ms,
        }
    }
}

fn validate_api_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|err| ConfigError::InvalidApiUrl(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(ConfigError::InvalidApiUrl(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Option<u64> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(
                component = "config",
                event = "config.invalid_value",
                key,
                value = raw
            );
            None
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
