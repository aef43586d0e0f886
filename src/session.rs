//! Per-browser session state for the login flow and dashboard.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Email,
    Otp,
    Dashboard,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Otp => "otp",
            Self::Dashboard => "dashboard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

pub fn parse_theme(input: &str) -> Option<Theme> {
    match input.trim().to_ascii_lowercase().as_str() {
        "dark" => Some(Theme::Dark),
        "light" => Some(Theme::Light),
        _ => None,
    }
}

/// Lookback window the backend uses for a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PredictionWindow {
    #[serde(rename = "15m")]
    M15,
    #[default]
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "24h")]
    H24,
}

pub const ALL_WINDOWS: [PredictionWindow; 4] = [
    PredictionWindow::M15,
    PredictionWindow::H1,
    PredictionWindow::H12,
    PredictionWindow::H24,
];

impl PredictionWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H12 => "12h",
            Self::H24 => "24h",
        }
    }
}

pub fn parse_window(input: &str) -> Option<PredictionWindow> {
    match input.trim().to_ascii_lowercase().as_str() {
        "15m" => Some(PredictionWindow::M15),
        "1h" => Some(PredictionWindow::H1),
        "12h" => Some(PredictionWindow::H12),
        "24h" => Some(PredictionWindow::H24),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Inline message shown once on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Transient state of one browser session. Lost on process restart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    pub step: Step,
    pub email: String,
    /// Email was verified by OTP (or adopted from a valid persisted login) during this run.
    pub verified: bool,
    pub stay_logged_in: bool,
    pub theme: Theme,
    pub window: PredictionWindow,
    pub auto_refresh: bool,
    pub pro: bool,
    pub notices: Vec<Notice>,
}

impl Session {
    pub fn has_verified_email(&self) -> bool {
        self.verified && !self.email.trim().is_empty()
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Drops everything, including display preferences.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
