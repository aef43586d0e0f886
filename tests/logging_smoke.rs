use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use axum_extra::extract::cookie::Key;
use predictor_dash::{
    dashboard_router, log_app_bind, log_app_start, log_backend_selected, log_cookie_key, Action,
    AppState, CookieSettings, FailureKind, HttpBackend, HttpBackendConfig, InMemoryBackend,
    LoggingConfig, MemoryAuthStore, PredictorBackend, Session, SessionFlow, Step,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(&cfg);
        log_backend_selected("http", Some("http://127.0.0.1:9000"), 10_000);
        log_cookie_key(true);
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8501));
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"backend.selected\""));
    assert!(logs.contains("\"base_url\":\"http://127.0.0.1:9000\""));
    assert!(logs.contains("\"event\":\"cookie_key.generated\""));
    assert!(logs.contains("\"event\":\"app.bind\""));
}

#[test]
fn login_flow_emits_session_events() {
    let backend = InMemoryBackend::demo();
    let flow = SessionFlow::new(&backend);
    let mut session = Session::default();
    let mut store = MemoryAuthStore::new();

    let logs = capture_logs(Level::INFO, || {
        flow.handle(
            &mut session,
            &mut store,
            Action::SendOtp {
                email: "trader@example.com".to_string(),
            },
        );
        let step = flow.handle(
            &mut session,
            &mut store,
            Action::VerifyOtp {
                otp: "123456".to_string(),
                stay_logged_in: true,
            },
        );
        assert_eq!(step, Step::Dashboard);
        flow.load_dashboard(&session);
        flow.handle(&mut session, &mut store, Action::Logout);
    });

    assert!(logs.contains("\"event\":\"otp.send.ok\""));
    assert!(logs.contains("\"event\":\"auth.persisted.written\""));
    assert!(logs.contains("\"event\":\"otp.verify.ok\""));
    assert!(logs.contains("\"event\":\"dashboard.load.done\""));
    assert!(logs.contains("\"event\":\"session.logout\""));
    assert!(store.is_saved_empty());
}

#[test]
fn inconsistent_saved_login_is_logged_as_warning() {
    let backend = InMemoryBackend::demo();
    let flow = SessionFlow::new(&backend);
    let mut session = Session::default();
    let mut store = MemoryAuthStore::with_saved(&[("authed", "1")]);

    let logs = capture_logs(Level::WARN, || {
        assert_eq!(flow.resume(&mut session, &mut store), Step::Email);
    });

    assert!(logs.contains("\"level\":\"WARN\""));
    assert!(logs.contains("\"event\":\"auth.persisted.inconsistent\""));
}

#[test]
fn unreachable_backend_logs_request_failure() {
    let backend = HttpBackend::new(&HttpBackendConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_ms: 500,
    })
    .expect("backend should build");

    let logs = capture_logs(Level::INFO, || {
        let err = backend
            .alerts("trader@example.com")
            .expect_err("nothing listens on the discard port");
        assert_eq!(err.kind, FailureKind::Transport);
    });

    assert!(logs.contains("\"event\":\"backend.request.failed\""));
    assert!(logs.contains("\"op\":\"alerts\""));
}

#[test]
fn form_posts_emit_http_action_event() {
    let logs = capture_logs(Level::DEBUG, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let backend: Arc<dyn PredictorBackend> = Arc::new(InMemoryBackend::demo());
            let state = AppState::new(backend, Key::generate(), CookieSettings::default(), 60);
            let app = dashboard_router(state);

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/theme")
                        .header("content-type", "application/x-www-form-urlencoded")
                        .body(Body::from("theme=light"))
                        .expect("request should build"),
                )
                .await
                .expect("theme request should succeed");

            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        });
    });

    assert!(logs.contains("\"event\":\"http.action\""));
    assert!(logs.contains("\"action\":\"set_theme\""));
}
