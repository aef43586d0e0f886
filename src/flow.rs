//! Session flow controller: `email` -> `otp` -> `dashboard`.
//!
//! Handlers take the session and the persisted store explicitly and return the
//! step the session ended in. Nothing here re-renders; the caller renders the
//! returned step once.

use tracing::{debug, info, warn};

use crate::auth_store::{
    clear_persisted_auth, read_persisted_auth, write_persisted_auth, AuthStore,
    PersistedAuthState,
};
use crate::backend::{
    Alert, ApiFailure, ApiResult, Direction, FailureKind, PredictionSet, PredictorBackend,
};
use crate::session::{Notice, PredictionWindow, Session, Step, Theme};

pub const OTP_LENGTH: usize = 6;
pub const MIN_ALERT_PERCENT: f64 = 0.1;
pub const ALERT_PRESETS: [f64; 4] = [1.0, 2.0, 5.0, 10.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertPercent {
    Preset(f64),
    Custom(f64),
}

impl AlertPercent {
    pub fn value(self) -> f64 {
        match self {
            Self::Preset(value) | Self::Custom(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendOtp { email: String },
    VerifyOtp { otp: String, stay_logged_in: bool },
    ResendOtp,
    ChangeEmail,
    Refresh,
    SetWindow(PredictionWindow),
    SetAutoRefresh(bool),
    SetTheme(Theme),
    AddAlert {
        symbol: String,
        direction: Direction,
        percent: AlertPercent,
    },
    DeleteAlert(Alert),
    ResetSavedLogin,
    Logout,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendOtp { .. } => "send_otp",
            Self::VerifyOtp { .. } => "verify_otp",
            Self::ResendOtp => "resend_otp",
            Self::ChangeEmail => "change_email",
            Self::Refresh => "refresh",
            Self::SetWindow(_) => "set_window",
            Self::SetAutoRefresh(_) => "set_auto_refresh",
            Self::SetTheme(_) => "set_theme",
            Self::AddAlert { .. } => "add_alert",
            Self::DeleteAlert(_) => "delete_alert",
            Self::ResetSavedLogin => "reset_saved_login",
            Self::Logout => "logout",
        }
    }

    fn allowed_in(&self, step: Step) -> bool {
        match self {
            Self::SendOtp { .. } => step == Step::Email,
            Self::VerifyOtp { .. } | Self::ResendOtp | Self::ChangeEmail => step == Step::Otp,
            Self::Refresh
            | Self::SetWindow(_)
            | Self::SetAutoRefresh(_)
            | Self::AddAlert { .. }
            | Self::DeleteAlert(_) => step == Step::Dashboard,
            Self::SetTheme(_) | Self::ResetSavedLogin | Self::Logout => true,
        }
    }
}

/// Everything the dashboard step shows. Each half fails independently.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardData {
    pub predictions: ApiResult<PredictionSet>,
    pub alerts: ApiResult<Vec<Alert>>,
}

pub struct SessionFlow<'a> {
    backend: &'a dyn PredictorBackend,
}

impl<'a> SessionFlow<'a> {
    pub fn new(backend: &'a dyn PredictorBackend) -> Self {
        Self { backend }
    }

    /// Restores the dashboard from a persisted login and enforces the
    /// dashboard invariant. Run before every render and action.
    pub fn resume(&self, session: &mut Session, store: &mut dyn AuthStore) -> Step {
        if session.step == Step::Dashboard && session.has_verified_email() {
            return session.step;
        }

        match read_persisted_auth(store) {
            PersistedAuthState::Valid(auth) => {
                info!(
                    component = "session_flow",
                    event = "auth.persisted.restored",
                    email = %auth.email
                );
                session.email = auth.email;
                session.verified = true;
                session.stay_logged_in = true;
                session.step = Step::Dashboard;
            }
            PersistedAuthState::Inconsistent {
                authed_raw,
                email_present,
            } => {
                warn!(
                    component = "session_flow",
                    event = "auth.persisted.inconsistent",
                    authed = ?authed_raw,
                    email_present
                );
                clear_persisted_auth(store);
                force_email_step(session);
            }
            PersistedAuthState::Absent => {
                if session.step == Step::Dashboard {
                    force_email_step(session);
                }
            }
        }

        session.step
    }

    pub fn handle(&self, session: &mut Session, store: &mut dyn AuthStore, action: Action) -> Step {
        if !action.allowed_in(session.step) {
            debug!(
                component = "session_flow",
                event = "action.ignored",
                action = action.name(),
                step = session.step.as_str()
            );
            return session.step;
        }

        match action {
            Action::SendOtp { email } => self.send_otp(session, &email),
            Action::VerifyOtp {
                otp,
                stay_logged_in,
            } => self.verify_otp(session, store, &otp, stay_logged_in),
            Action::ResendOtp => self.resend_otp(session),
            Action::ChangeEmail => {
                session.email.clear();
                session.step = Step::Email;
            }
            Action::Refresh => {}
            Action::SetWindow(window) => session.window = window,
            Action::SetAutoRefresh(enabled) => session.auto_refresh = enabled,
            Action::SetTheme(theme) => session.theme = theme,
            Action::AddAlert {
                symbol,
                direction,
                percent,
            } => self.add_alert(session, &symbol, direction, percent),
            Action::DeleteAlert(alert) => self.delete_alert(session, &alert),
            Action::ResetSavedLogin => {
                clear_persisted_auth(store);
                session.stay_logged_in = false;
                info!(component = "session_flow", event = "auth.persisted.reset");
                session.push_notice(Notice::info("Saved login removed from this browser."));
            }
            Action::Logout => logout(session, store),
        }

        session.step
    }

    /// Fetches predictions and alerts for the session email. Never calls the
    /// backend without a non-empty email.
    pub fn load_dashboard(&self, session: &Session) -> DashboardData {
        let email = session.email.trim();
        if email.is_empty() {
            warn!(
                component = "session_flow",
                event = "dashboard.load.missing_email"
            );
            let failure = ApiFailure::new(
                FailureKind::InvalidInput,
                "No verified email for this session.",
            );
            return DashboardData {
                predictions: Err(failure.clone()),
                alerts: Err(failure),
            };
        }

        let predictions = self.backend.predictions(email, session.window);
        let alerts = self.backend.alerts(email);
        info!(
            component = "session_flow",
            event = "dashboard.load.done",
            window = session.window.as_str(),
            predictions_ok = predictions.is_ok(),
            alerts_ok = alerts.is_ok()
        );

        DashboardData {
            predictions,
            alerts,
        }
    }

    fn send_otp(&self, session: &mut Session, email: &str) {
        let email = email.trim();
        if email.is_empty() {
            session.push_notice(Notice::warning("Please enter your email."));
            return;
        }

        match self.backend.send_otp(email) {
            Ok(()) => {
                info!(component = "session_flow", event = "otp.send.ok", email);
                session.email = email.to_string();
                session.verified = false;
                session.step = Step::Otp;
                session.push_notice(Notice::success("OTP sent! Check your inbox."));
            }
            Err(failure) => {
                info!(
                    component = "session_flow",
                    event = "otp.send.failed",
                    email,
                    kind = ?failure.kind
                );
                session.push_notice(Notice::error(failure.message));
            }
        }
    }

    fn resend_otp(&self, session: &mut Session) {
        match self.backend.send_otp(&session.email) {
            Ok(()) => {
                info!(
                    component = "session_flow",
                    event = "otp.resend.ok",
                    email = %session.email
                );
                session.push_notice(Notice::success("A new OTP is on its way."));
            }
            Err(failure) => session.push_notice(Notice::error(failure.message)),
        }
    }

    fn verify_otp(
        &self,
        session: &mut Session,
        store: &mut dyn AuthStore,
        otp: &str,
        stay_logged_in: bool,
    ) {
        let otp = otp.trim();
        if otp.chars().count() != OTP_LENGTH {
            session.push_notice(Notice::warning(format!(
                "Please enter the {OTP_LENGTH}-character code from your email."
            )));
            return;
        }

        match self.backend.verify_otp(&session.email, otp) {
            Ok(verification) => {
                session.verified = true;
                session.pro = verification.pro;
                session.stay_logged_in = stay_logged_in;
                if stay_logged_in {
                    write_persisted_auth(store, &session.email);
                    info!(
                        component = "session_flow",
                        event = "auth.persisted.written",
                        email = %session.email
                    );
                }
                info!(
                    component = "session_flow",
                    event = "otp.verify.ok",
                    email = %session.email,
                    pro = verification.pro,
                    stay_logged_in
                );
                session.step = Step::Dashboard;
                session.push_notice(Notice::success("Login successful!"));
            }
            Err(failure) => {
                info!(
                    component = "session_flow",
                    event = "otp.verify.failed",
                    email = %session.email,
                    kind = ?failure.kind
                );
                session.push_notice(Notice::error(failure.message));
            }
        }
    }

    fn add_alert(
        &self,
        session: &mut Session,
        symbol: &str,
        direction: Direction,
        percent: AlertPercent,
    ) {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            session.push_notice(Notice::warning("Please choose a coin for the alert."));
            return;
        }
        let value = percent.value();
        if !value.is_finite() || value < MIN_ALERT_PERCENT {
            session.push_notice(Notice::warning(format!(
                "Alert percent must be at least {MIN_ALERT_PERCENT}."
            )));
            return;
        }

        let alert = Alert::new(symbol, direction, value);
        match self.backend.add_alert(&session.email, &alert) {
            Ok(()) => {
                info!(
                    component = "session_flow",
                    event = "alert.add.ok",
                    symbol = %alert.symbol,
                    direction = alert.direction.as_str(),
                    percent = alert.percent
                );
                session.push_notice(Notice::success(format!(
                    "Alert added: {} {} {}%",
                    alert.symbol,
                    alert.direction.as_str(),
                    alert.percent
                )));
            }
            Err(failure) => {
                info!(
                    component = "session_flow",
                    event = "alert.add.failed",
                    kind = ?failure.kind
                );
                session.push_notice(Notice::error(failure.message));
            }
        }
    }

    fn delete_alert(&self, session: &mut Session, alert: &Alert) {
        match self.backend.delete_alert(&session.email, alert) {
            Ok(()) => {
                info!(
                    component = "session_flow",
                    event = "alert.delete.ok",
                    symbol = %alert.symbol,
                    direction = alert.direction.as_str(),
                    percent = alert.percent
                );
                session.push_notice(Notice::success("Alert deleted."));
            }
            Err(failure) => {
                info!(
                    component = "session_flow",
                    event = "alert.delete.failed",
                    kind = ?failure.kind
                );
                session.push_notice(Notice::error(failure.message));
            }
        }
    }
}

fn force_email_step(session: &mut Session) {
    session.email.clear();
    session.verified = false;
    session.stay_logged_in = false;
    session.pro = false;
    session.step = Step::Email;
}

fn logout(session: &mut Session, store: &mut dyn AuthStore) {
    info!(
        component = "session_flow",
        event = "session.logout",
        step = session.step.as_str()
    );
    session.reset();
    clear_persisted_auth(store);
    session.push_notice(Notice::info("You have been logged out."));
}
