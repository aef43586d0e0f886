//! Dashboard front-end for the AI crypto prediction backend.
//!
//! - email OTP login flow with an optional encrypted "stay logged in" cookie
//! - coin prediction tiles per lookback window
//! - user price alerts (list/add/delete) forwarded to the backend

mod auth_store;
mod backend;
mod config;
mod flow;
mod observability;
mod session;
mod view;
mod web;

pub use auth_store::{
    clear_persisted_auth, read_persisted_auth, write_persisted_auth, AuthStore, CookieAuthStore,
    CookieSettings, MemoryAuthStore, PersistedAuth, PersistedAuthState, AUTHED_KEY, EMAIL_KEY,
};
pub use backend::{
    demo_coins, parse_direction, Alert, ApiFailure, ApiResult, BackendInitError, CoinPrediction,
    Direction, FailureKind, HttpBackend, HttpBackendConfig, InMemoryBackend, PredictionSet,
    PredictorBackend, Verification, DEFAULT_API_URL, INVALID_OTP, SEND_OTP_FAILED,
};
pub use config::{AppConfig, ConfigError};
pub use flow::{
    Action, AlertPercent, DashboardData, SessionFlow, ALERT_PRESETS, MIN_ALERT_PERCENT, OTP_LENGTH,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_backend_selected, log_cookie_key,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use session::{
    parse_theme, parse_window, Notice, NoticeLevel, PredictionWindow, Session, Step, Theme,
    ALL_WINDOWS,
};
pub use view::{
    coin_tile, format_alert_percent, format_change, format_confidence, format_price,
    render_page, timestamp_label, CoinTile, PageContext,
};
pub use web::{cookie_key_from_secret, dashboard_router, AppState, SessionRegistry};
