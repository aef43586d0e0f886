//! axum routes: one page endpoint plus one POST endpoint per flow action.
//!
//! Each browser gets an in-memory [`Session`] keyed by an id kept in the
//! encrypted cookie jar. Backend calls are blocking and run on the blocking
//! pool; every POST answers with a redirect back to `/`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use serde::Deserialize;
use sha2::{Digest, Sha512};
use tokio::sync::Mutex as SessionLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth_store::{AuthStore, CookieAuthStore, CookieSettings};
use crate::backend::{parse_direction, Alert, PredictorBackend};
use crate::config::parse_bool;
use crate::flow::{Action, AlertPercent, SessionFlow, ALERT_PRESETS};
use crate::session::{parse_theme, parse_window, Notice, Session, Step};
use crate::view::{render_page, PageContext};

pub const SESSION_ID_KEY: &str = "sid";
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

type SessionSlot = Arc<SessionLock<Session>>;

struct RegistryEntry {
    slot: SessionSlot,
    last_seen: Instant,
}

/// Transient sessions; dropped with the process. Every session has its own
/// lock, held for the whole request, so requests from one browser run one at
/// a time. Sessions idle for longer than the timeout are evicted.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, RegistryEntry>>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE)
    }
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Live slot for `id`; refreshes its idle clock.
    fn slot(&self, id: &str) -> Option<SessionSlot> {
        let now = Instant::now();
        let mut entries = self.entries();
        let entry = entries.get_mut(id)?;
        if now.saturating_duration_since(entry.last_seen) > self.idle_timeout {
            entries.remove(id);
            return None;
        }
        entry.last_seen = now;
        Some(Arc::clone(&entry.slot))
    }

    fn insert(&self, id: &str, session: Session) {
        let now = Instant::now();
        let mut entries = self.entries();
        evict_idle(&mut entries, now, self.idle_timeout);
        entries.insert(
            id.to_string(),
            RegistryEntry {
                slot: Arc::new(SessionLock::new(session)),
                last_seen: now,
            },
        );
    }

    fn remove(&self, id: &str) {
        self.entries().remove(id);
    }

    /// Evicts sessions idle for longer than the timeout as of `now`.
    /// Returns the number evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        evict_idle(&mut self.entries(), now, self.idle_timeout)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.inner
            .lock()
            .expect("session registry lock should not be poisoned")
    }
}

fn evict_idle(
    entries: &mut HashMap<String, RegistryEntry>,
    now: Instant,
    idle_timeout: Duration,
) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= idle_timeout);
    let evicted = before - entries.len();
    if evicted > 0 {
        debug!(
            component = "web",
            event = "http.session.evicted",
            evicted,
            remaining = entries.len()
        );
    }
    evicted
}

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn PredictorBackend>,
    sessions: SessionRegistry,
    cookie_key: Key,
    cookie: CookieSettings,
    auto_refresh_secs: u64,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn PredictorBackend>,
        cookie_key: Key,
        cookie: CookieSettings,
        auto_refresh_secs: u64,
    ) -> Self {
        Self {
            backend,
            sessions: SessionRegistry::default(),
            cookie_key,
            cookie,
            auto_refresh_secs,
        }
    }

    pub fn with_session_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.sessions = SessionRegistry::new(idle_timeout);
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Expands a configured secret into the 64-byte cookie key, or generates a
/// throwaway key. The flag is `true` when the key was generated.
pub fn cookie_key_from_secret(secret: Option<&str>) -> (Key, bool) {
    match secret {
        Some(secret) => (Key::from(Sha512::digest(secret.as_bytes()).as_slice()), false),
        None => (Key::generate(), true),
    }
}

pub fn dashboard_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_page))
        .route("/login/send-otp", post(post_send_otp))
        .route("/login/verify-otp", post(post_verify_otp))
        .route("/login/resend", post(post_resend_otp))
        .route("/login/change-email", post(post_change_email))
        .route("/dashboard/refresh", post(post_refresh))
        .route("/dashboard/window", post(post_window))
        .route("/dashboard/auto-refresh", post(post_auto_refresh))
        .route("/alerts/add", post(post_add_alert))
        .route("/alerts/delete", post(post_delete_alert))
        .route("/theme", post(post_theme))
        .route("/saved-login/reset", post(post_reset_saved_login))
        .route("/logout", post(post_logout))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct EmailForm {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct OtpForm {
    #[serde(default)]
    otp: String,
    stay_logged_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WindowForm {
    #[serde(default)]
    window: String,
}

#[derive(Debug, Deserialize)]
struct ToggleForm {
    #[serde(default)]
    enabled: String,
}

#[derive(Debug, Deserialize)]
struct ThemeForm {
    #[serde(default)]
    theme: String,
}

#[derive(Debug, Deserialize)]
struct AddAlertForm {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    preset: String,
    #[serde(default)]
    custom: String,
}

#[derive(Debug, Deserialize)]
struct AlertForm {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    percent: String,
}

async fn get_page(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    let auto_refresh_secs = state.auto_refresh_secs;
    let rendered = with_session(&state, jar, false, move |flow, session, _store| {
        let dashboard = (session.step == Step::Dashboard).then(|| flow.load_dashboard(session));
        let notices = session.take_notices();
        render_page(&PageContext {
            session,
            notices: &notices,
            dashboard: dashboard.as_ref(),
            auto_refresh_secs,
        })
    })
    .await;

    match rendered {
        Ok((jar, html)) => (jar, Html(html)).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn post_send_otp(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<EmailForm>,
) -> Response {
    dispatch(&state, jar, Action::SendOtp { email: form.email }).await
}

async fn post_verify_otp(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<OtpForm>,
) -> Response {
    let stay_logged_in = form
        .stay_logged_in
        .as_deref()
        .and_then(parse_bool)
        .unwrap_or(false);
    dispatch(
        &state,
        jar,
        Action::VerifyOtp {
            otp: form.otp,
            stay_logged_in,
        },
    )
    .await
}

async fn post_resend_otp(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    dispatch(&state, jar, Action::ResendOtp).await
}

async fn post_change_email(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    dispatch(&state, jar, Action::ChangeEmail).await
}

async fn post_refresh(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    dispatch(&state, jar, Action::Refresh).await
}

async fn post_window(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<WindowForm>,
) -> Response {
    match parse_window(&form.window) {
        Some(window) => dispatch(&state, jar, Action::SetWindow(window)).await,
        None => reject(&state, jar, format!("Unknown window '{}'.", form.window)).await,
    }
}

async fn post_auto_refresh(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<ToggleForm>,
) -> Response {
    let enabled = parse_bool(&form.enabled).unwrap_or(false);
    dispatch(&state, jar, Action::SetAutoRefresh(enabled)).await
}

async fn post_theme(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<ThemeForm>,
) -> Response {
    match parse_theme(&form.theme) {
        Some(theme) => dispatch(&state, jar, Action::SetTheme(theme)).await,
        None => reject(&state, jar, format!("Unknown theme '{}'.", form.theme)).await,
    }
}

async fn post_add_alert(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<AddAlertForm>,
) -> Response {
    let Some(direction) = parse_direction(&form.direction) else {
        return reject(&state, jar, "Choose UP or DOWN for the alert.".to_string()).await;
    };
    let percent = match parse_alert_percent(&form.preset, &form.custom) {
        Ok(percent) => percent,
        Err(message) => return reject(&state, jar, message).await,
    };

    dispatch(
        &state,
        jar,
        Action::AddAlert {
            symbol: form.symbol,
            direction,
            percent,
        },
    )
    .await
}

async fn post_delete_alert(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<AlertForm>,
) -> Response {
    let direction = parse_direction(&form.direction);
    let percent = form.percent.trim().parse::<f64>().ok();
    match (direction, percent) {
        (Some(direction), Some(percent)) => {
            let alert = Alert::new(form.symbol.trim(), direction, percent);
            dispatch(&state, jar, Action::DeleteAlert(alert)).await
        }
        _ => reject(&state, jar, "That alert could not be identified.".to_string()).await,
    }
}

async fn post_reset_saved_login(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    dispatch(&state, jar, Action::ResetSavedLogin).await
}

async fn post_logout(State(state): State<AppState>, jar: PrivateCookieJar) -> Response {
    dispatch(&state, jar, Action::Logout).await
}

fn parse_alert_percent(preset: &str, custom: &str) -> Result<AlertPercent, String> {
    let preset = preset.trim();
    if preset.is_empty() || preset.eq_ignore_ascii_case("custom") {
        let custom = custom.trim();
        if custom.is_empty() {
            return Err("Enter a custom alert percent.".to_string());
        }
        return custom
            .parse::<f64>()
            .map(AlertPercent::Custom)
            .map_err(|_| format!("'{custom}' is not a number."));
    }

    match preset.parse::<f64>() {
        Ok(value) if ALERT_PRESETS.contains(&value) => Ok(AlertPercent::Preset(value)),
        _ => Err(format!("Unknown alert preset '{preset}'.")),
    }
}

async fn dispatch(state: &AppState, jar: PrivateCookieJar, action: Action) -> Response {
    debug!(
        component = "web",
        event = "http.action",
        action = action.name()
    );
    // Logout moves the reset session to a fresh id.
    let rotate = matches!(action, Action::Logout);
    let handled = with_session(state, jar, rotate, move |flow, session, store| {
        flow.handle(session, store, action);
    })
    .await;

    match handled {
        Ok((jar, ())) => (jar, Redirect::to("/")).into_response(),
        Err(status) => status.into_response(),
    }
}

/// Invalid form input: queue a warning and go back to the page.
async fn reject(state: &AppState, jar: PrivateCookieJar, message: String) -> Response {
    let handled = with_session(state, jar, false, move |_flow, session, _store| {
        session.push_notice(Notice::warning(message));
    })
    .await;

    match handled {
        Ok((jar, ())) => (jar, Redirect::to("/")).into_response(),
        Err(status) => status.into_response(),
    }
}

/// Runs `work` against the browser's session while holding that session's
/// lock. A browser without a live session gets a fresh one, which is only
/// registered (and its id cookie only set) if the request changed it. With
/// `rotate` the session is moved to a new id and the old id is dropped.
async fn with_session<T, F>(
    state: &AppState,
    jar: PrivateCookieJar,
    rotate: bool,
    work: F,
) -> Result<(PrivateCookieJar, T), StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&SessionFlow<'_>, &mut Session, &mut dyn AuthStore) -> T + Send + 'static,
{
    let sid_name = state.cookie.cookie_name(SESSION_ID_KEY);
    let current = jar
        .get(&sid_name)
        .map(|cookie| cookie.value().to_string())
        .and_then(|id| state.sessions.slot(&id).map(|slot| (id, slot)));
    let (current_id, guard) = match current {
        Some((id, slot)) => (Some(id), Some(slot.lock_owned().await)),
        None => (None, None),
    };
    let backend = Arc::clone(&state.backend);
    let settings = state.cookie.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = guard;
        let mut fresh = Session::default();
        let mut store = CookieAuthStore::new(jar, settings);
        let flow = SessionFlow::new(backend.as_ref());
        let output = {
            let session = match guard.as_deref_mut() {
                Some(session) => session,
                None => &mut fresh,
            };
            let store: &mut dyn AuthStore = &mut store;
            flow.resume(session, store);
            work(&flow, session, store)
        };
        let register = match guard.as_deref_mut() {
            Some(session) if rotate => Some(std::mem::take(session)),
            Some(_) => None,
            None => (fresh != Session::default()).then_some(fresh),
        };
        (store.into_jar(), guard, register, output)
    })
    .await;

    match joined {
        Ok((mut jar, guard, register, output)) => {
            if let Some(session) = register {
                if let Some(old_id) = &current_id {
                    state.sessions.remove(old_id);
                }
                let id = Uuid::new_v4().to_string();
                state.sessions.insert(&id, session);
                debug!(
                    component = "web",
                    event = "http.session.created",
                    rotated = current_id.is_some(),
                    sessions = state.sessions.len()
                );
                jar = jar.add(
                    Cookie::build((sid_name, id))
                        .path("/")
                        .http_only(true)
                        .same_site(SameSite::Lax),
                );
            }
            drop(guard);
            Ok((jar, output))
        }
        Err(err) => {
            error!(
                component = "web",
                event = "http.worker.failed",
                error = %err
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_secret_gives_stable_key() {
        let (a, generated) = cookie_key_from_secret(Some("correct horse"));
        let (b, _) = cookie_key_from_secret(Some("correct horse"));
        assert!(!generated);
        assert_eq!(a.master(), b.master());

        let (_, generated) = cookie_key_from_secret(None);
        assert!(generated);
    }

    #[test]
    fn alert_percent_parsing() {
        assert_eq!(parse_alert_percent("5", ""), Ok(AlertPercent::Preset(5.0)));
        assert_eq!(
            parse_alert_percent("custom", "0.25"),
            Ok(AlertPercent::Custom(0.25))
        );
        assert_eq!(parse_alert_percent("", "3"), Ok(AlertPercent::Custom(3.0)));
        assert!(parse_alert_percent("7", "").is_err());
        assert!(parse_alert_percent("custom", "").is_err());
        assert!(parse_alert_percent("custom", "lots").is_err());
    }

    #[test]
    fn registry_evicts_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert!(registry.is_empty());
        assert!(registry.slot("nope").is_none());

        registry.insert("one", Session::default());
        registry.insert("two", Session::default());
        assert_eq!(registry.len(), 2);
        assert!(registry.slot("one").is_some());

        assert_eq!(registry.sweep(Instant::now()), 0);
        assert_eq!(registry.sweep(Instant::now() + Duration::from_secs(61)), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn expired_slot_is_dropped_on_lookup() {
        let registry = SessionRegistry::new(Duration::ZERO);
        registry.insert("one", Session::default());
        std::thread::sleep(Duration::from_millis(5));

        assert!(registry.slot("one").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn removed_session_is_gone() {
        let registry = SessionRegistry::default();
        registry.insert("one", Session::default());
        registry.remove("one");
        assert!(registry.slot("one").is_none());
        assert_eq!(registry.idle_timeout(), DEFAULT_SESSION_IDLE);
    }
}
