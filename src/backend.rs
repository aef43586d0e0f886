//! Client for the remote prediction backend.
//!
//! Every call returns an [`ApiResult`]; transport errors, non-2xx statuses,
//! rejected requests and undecodable payloads all become an [`ApiFailure`]
//! carrying a message that can be shown to the user as-is.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::PredictionWindow;

pub const DEFAULT_API_URL: &str = "https://ai-crypto-predictor.onrender.com";

pub const SEND_OTP_FAILED: &str = "Failed to send OTP.";
pub const INVALID_OTP: &str = "Invalid OTP. Please try again.";
const ALERT_CHANGE_REJECTED: &str = "The backend rejected the alert change.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "UP", alias = "up", alias = "Up")]
    Up,
    #[serde(rename = "DOWN", alias = "down", alias = "Down")]
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

pub fn parse_direction(input: &str) -> Option<Direction> {
    match input.trim().to_ascii_uppercase().as_str() {
        "UP" => Some(Direction::Up),
        "DOWN" => Some(Direction::Down),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPrediction {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub prediction: Direction,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionSet {
    pub coins: Vec<CoinPrediction>,
    /// Backend-provided generation time; either unix seconds or a preformatted string.
    pub timestamp: Option<serde_json::Value>,
    pub window: Option<String>,
    pub stale: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub direction: Direction,
    pub percent: f64,
}

impl Alert {
    pub fn new(symbol: impl Into<String>, direction: Direction, percent: f64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            percent,
        }
    }

    /// Same (symbol, direction, percent) tuple; symbols compare case-insensitively.
    pub fn same_tuple(&self, other: &Alert) -> bool {
        self.symbol.eq_ignore_ascii_case(&other.symbol)
            && self.direction == other.direction
            && (self.percent - other.percent).abs() < 1e-9
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub pro: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Status(u16),
    Rejected,
    Malformed,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ApiFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }
}

pub type ApiResult<T> = Result<T, ApiFailure>;

pub trait PredictorBackend: Send + Sync + 'static {
    fn send_otp(&self, email: &str) -> ApiResult<()>;
    fn verify_otp(&self, email: &str, otp: &str) -> ApiResult<Verification>;
    fn predictions(&self, email: &str, window: PredictionWindow) -> ApiResult<PredictionSet>;
    fn alerts(&self, email: &str) -> ApiResult<Vec<Alert>>;
    fn add_alert(&self, email: &str, alert: &Alert) -> ApiResult<()>;
    fn delete_alert(&self, email: &str, alert: &Alert) -> ApiResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("invalid backend base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
}

#[derive(Debug, Deserialize)]
struct SendOtpReply {
    #[serde(default)]
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyOtpReply {
    #[serde(default)]
    authenticated: bool,
    message: Option<String>,
    pro: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PredictionsReply {
    coins: Option<Vec<CoinPrediction>>,
    timestamp: Option<serde_json::Value>,
    window: Option<String>,
    #[serde(default)]
    stale: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertsReply {
    alerts: Option<Vec<Alert>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MutationReply {
    #[serde(default)]
    success: bool,
    message: Option<String>,
}

/// Blocking reqwest client with a bounded per-request timeout.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(cfg: &HttpBackendConfig) -> Result<Self, BackendInitError> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|err| BackendInitError::InvalidBaseUrl {
            url: cfg.base_url.clone(),
            message: err.to_string(),
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| BackendInitError::HttpClientBuild(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn endpoint_with_params(&self, path: &str, params: &[(&str, &str)]) -> ApiResult<Url> {
        Url::parse_with_params(&self.endpoint(path), params).map_err(|err| {
            ApiFailure::new(
                FailureKind::InvalidInput,
                format!("could not build request URL: {err}"),
            )
        })
    }

    fn execute(&self, op: &'static str, request: RequestBuilder) -> ApiResult<Response> {
        request.send().map_err(|err| {
            let message = if err.is_timeout() {
                "The backend did not answer in time. Please try again.".to_string()
            } else {
                format!("Could not reach the backend: {err}")
            };
            log_failure(op, FailureKind::Transport, &message);
            ApiFailure::new(FailureKind::Transport, message)
        })
    }

    fn decode<T: DeserializeOwned>(&self, op: &'static str, response: Response) -> ApiResult<T> {
        let status = response.status();
        let body = response.bytes().map_err(|err| {
            let message = format!("Could not read the backend response: {err}");
            log_failure(op, FailureKind::Transport, &message);
            ApiFailure::new(FailureKind::Transport, message)
        })?;

        if !status.is_success() {
            let message = body_message(&body)
                .unwrap_or_else(|| format!("backend returned HTTP {}", status.as_u16()));
            let kind = FailureKind::Status(status.as_u16());
            log_failure(op, kind, &message);
            return Err(ApiFailure::new(kind, message));
        }

        serde_json::from_slice(&body).map_err(|err| {
            let message = format!("The backend sent an unexpected response: {err}");
            log_failure(op, FailureKind::Malformed, &message);
            ApiFailure::malformed(message)
        })
    }

    fn mutation(&self, op: &'static str, response: Response) -> ApiResult<()> {
        let reply: MutationReply = self.decode(op, response)?;
        if reply.success {
            Ok(())
        } else {
            Err(ApiFailure::rejected(
                reply
                    .message
                    .unwrap_or_else(|| ALERT_CHANGE_REJECTED.to_string()),
            ))
        }
    }
}

impl PredictorBackend for HttpBackend {
    fn send_otp(&self, email: &str) -> ApiResult<()> {
        let request = self
            .client
            .post(self.endpoint("/send-otp"))
            .json(&serde_json::json!({ "email": email }));
        let response = self.execute("send_otp", request)?;
        let reply: SendOtpReply = self.decode("send_otp", response)?;

        if reply.success {
            Ok(())
        } else {
            Err(ApiFailure::rejected(
                reply.message.unwrap_or_else(|| SEND_OTP_FAILED.to_string()),
            ))
        }
    }

    fn verify_otp(&self, email: &str, otp: &str) -> ApiResult<Verification> {
        let request = self
            .client
            .post(self.endpoint("/verify-otp"))
            .json(&serde_json::json!({ "email": email, "otp": otp }));
        let response = self.execute("verify_otp", request)?;
        let reply: VerifyOtpReply = self.decode("verify_otp", response)?;

        if reply.authenticated {
            Ok(Verification {
                pro: reply.pro.unwrap_or(false),
            })
        } else {
            Err(ApiFailure::rejected(
                reply.message.unwrap_or_else(|| INVALID_OTP.to_string()),
            ))
        }
    }

    fn predictions(&self, email: &str, window: PredictionWindow) -> ApiResult<PredictionSet> {
        let url = self.endpoint_with_params(
            "/predict",
            &[("email", email), ("window", window.as_str())],
        )?;
        let response = self.execute("predictions", self.client.get(url))?;
        let reply: PredictionsReply = self.decode("predictions", response)?;

        match (reply.coins, reply.error) {
            (Some(coins), error) => Ok(PredictionSet {
                coins,
                timestamp: reply.timestamp,
                window: reply.window,
                stale: reply.stale,
                error,
            }),
            (None, Some(error)) => Err(ApiFailure::rejected(error)),
            (None, None) => Err(ApiFailure::malformed(
                "The backend response did not include any predictions.",
            )),
        }
    }

    fn alerts(&self, email: &str) -> ApiResult<Vec<Alert>> {
        let url = self.endpoint_with_params("/alerts", &[("email", email)])?;
        let response = self.execute("alerts", self.client.get(url))?;
        let reply: AlertsReply = self.decode("alerts", response)?;

        match (reply.alerts, reply.error) {
            (Some(alerts), _) => Ok(alerts),
            (None, Some(error)) => Err(ApiFailure::rejected(error)),
            (None, None) => Err(ApiFailure::malformed(
                "The backend response did not include an alert list.",
            )),
        }
    }

    fn add_alert(&self, email: &str, alert: &Alert) -> ApiResult<()> {
        let request = self.client.post(self.endpoint("/alerts")).json(&serde_json::json!({
            "email": email,
            "symbol": alert.symbol,
            "direction": alert.direction.as_str(),
            "percent": alert.percent,
        }));
        let response = self.execute("add_alert", request)?;

        if response.status() != StatusCode::METHOD_NOT_ALLOWED {
            return self.mutation("add_alert", response);
        }

        info!(
            component = "backend",
            event = "backend.alert_add.fallback_get",
            symbol = %alert.symbol
        );
        let percent = percent_param(alert.percent);
        let url = self.endpoint_with_params(
            "/alerts/add",
            &[
                ("email", email),
                ("symbol", alert.symbol.as_str()),
                ("direction", alert.direction.as_str()),
                ("percent", percent.as_str()),
            ],
        )?;
        let response = self.execute("add_alert", self.client.get(url))?;
        self.mutation("add_alert", response)
    }

    fn delete_alert(&self, email: &str, alert: &Alert) -> ApiResult<()> {
        let percent = percent_param(alert.percent);
        let url = self.endpoint_with_params(
            "/alerts",
            &[
                ("email", email),
                ("symbol", alert.symbol.as_str()),
                ("direction", alert.direction.as_str()),
                ("percent", percent.as_str()),
            ],
        )?;
        let response = self.execute("delete_alert", self.client.delete(url))?;
        self.mutation("delete_alert", response)
    }
}

/// Query-string form of a percent, identical to its JSON number form (`5.0`, `2.5`).
fn percent_param(value: f64) -> String {
    serde_json::Value::from(value).to_string()
}

fn body_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

fn log_failure(op: &'static str, kind: FailureKind, message: &str) {
    warn!(
        component = "backend",
        event = "backend.request.failed",
        op,
        kind = ?kind,
        message
    );
}

pub fn demo_coins() -> Vec<CoinPrediction> {
    vec![
        CoinPrediction {
            symbol: "BTC".to_string(),
            price: 65_000.12,
            change: -1.5,
            prediction: Direction::Down,
            confidence: 72.0,
        },
        CoinPrediction {
            symbol: "ETH".to_string(),
            price: 3_150.4,
            change: 2.1,
            prediction: Direction::Up,
            confidence: 64.5,
        },
        CoinPrediction {
            symbol: "SOL".to_string(),
            price: 148.77,
            change: 3.42,
            prediction: Direction::Up,
            confidence: 58.0,
        },
        CoinPrediction {
            symbol: "XRP".to_string(),
            price: 0.5234,
            change: -0.8,
            prediction: Direction::Down,
            confidence: 55.0,
        },
    ]
}

#[derive(Debug, Default)]
struct MemoryState {
    pending_codes: HashSet<String>,
    alerts: HashMap<String, Vec<Alert>>,
    coins: Vec<CoinPrediction>,
    send_failure: Option<String>,
    pro_emails: HashSet<String>,
    prediction_emails: Vec<String>,
}

/// Self-contained backend: one fixed OTP code, alerts kept per email.
pub struct InMemoryBackend {
    otp_code: String,
    inner: Mutex<MemoryState>,
}

impl InMemoryBackend {
    pub fn new(otp_code: impl Into<String>, coins: Vec<CoinPrediction>) -> Self {
        Self {
            otp_code: otp_code.into(),
            inner: Mutex::new(MemoryState {
                coins,
                ..MemoryState::default()
            }),
        }
    }

    pub fn demo() -> Self {
        Self::new("123456", demo_coins())
    }

    pub fn otp_code(&self) -> &str {
        &self.otp_code
    }

    pub fn fail_send_otp(&self, message: impl Into<String>) {
        self.state().send_failure = Some(message.into());
    }

    pub fn mark_pro(&self, email: &str) {
        self.state().pro_emails.insert(email.to_string());
    }

    /// Emails passed to every predictions call so far, in order.
    pub fn prediction_requests(&self) -> Vec<String> {
        self.state().prediction_emails.clone()
    }

    pub fn alerts_for(&self, email: &str) -> Vec<Alert> {
        self.state().alerts.get(email).cloned().unwrap_or_default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner
            .lock()
            .expect("in-memory backend lock should not be poisoned")
    }
}

impl PredictorBackend for InMemoryBackend {
    fn send_otp(&self, email: &str) -> ApiResult<()> {
        let mut state = self.state();
        if let Some(message) = state.send_failure.clone() {
            return Err(ApiFailure::rejected(message));
        }
        state.pending_codes.insert(email.to_string());
        debug!(component = "backend", event = "backend.memory.otp_issued", email);
        Ok(())
    }

    fn verify_otp(&self, email: &str, otp: &str) -> ApiResult<Verification> {
        let mut state = self.state();
        if otp != self.otp_code || !state.pending_codes.remove(email) {
            return Err(ApiFailure::rejected(INVALID_OTP));
        }
        Ok(Verification {
            pro: state.pro_emails.contains(email),
        })
    }

    fn predictions(&self, email: &str, window: PredictionWindow) -> ApiResult<PredictionSet> {
        let mut state = self.state();
        state.prediction_emails.push(email.to_string());
        Ok(PredictionSet {
            coins: state.coins.clone(),
            timestamp: Some(serde_json::Value::from(Utc::now().timestamp())),
            window: Some(window.as_str().to_string()),
            stale: false,
            error: None,
        })
    }

    fn alerts(&self, email: &str) -> ApiResult<Vec<Alert>> {
        Ok(self.alerts_for(email))
    }

    fn add_alert(&self, email: &str, alert: &Alert) -> ApiResult<()> {
        let mut state = self.state();
        let alerts = state.alerts.entry(email.to_string()).or_default();
        if !alerts.iter().any(|existing| existing.same_tuple(alert)) {
            alerts.push(alert.clone());
        }
        Ok(())
    }

    fn delete_alert(&self, email: &str, alert: &Alert) -> ApiResult<()> {
        let mut state = self.state();
        let alerts = state.alerts.entry(email.to_string()).or_default();
        let before = alerts.len();
        alerts.retain(|existing| !existing.same_tuple(alert));
        if alerts.len() == before {
            return Err(ApiFailure::rejected("Alert not found."));
        }
        Ok(())
    }
}
