use std::sync::Arc;
use std::time::Duration;

use predictor_dash::{
    cookie_key_from_secret, dashboard_router, init_logging, log_app_bind, log_app_start,
    log_backend_selected, log_cookie_key, logging_config_from_env, AppConfig, AppState,
    HttpBackend, InMemoryBackend, PredictorBackend,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = AppConfig::from_env()?;
    let backend = backend_from_config(&cfg)?;

    let (cookie_key, generated) = cookie_key_from_secret(cfg.cookie_secret.as_deref());
    log_cookie_key(generated);

    let state = AppState::new(
        Arc::clone(&backend),
        cookie_key,
        cfg.cookie.clone(),
        cfg.auto_refresh_secs,
    )
    .with_session_idle_timeout(Duration::from_secs(cfg.session_idle_secs));

    // The blocking HTTP client must not be dropped on a runtime worker, so the
    // runtime is built by hand and `backend` outlives it.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
        log_app_bind(listener.local_addr()?);
        axum::serve(listener, dashboard_router(state)).await
    })?;
    drop(runtime);
    drop(backend);

    Ok(())
}

fn backend_from_config(
    cfg: &AppConfig,
) -> Result<Arc<dyn PredictorBackend>, Box<dyn std::error::Error>> {
    if cfg.use_demo_backend {
        let backend = InMemoryBackend::demo();
        log_backend_selected("demo", None, 0);
        return Ok(Arc::new(backend));
    }

    let backend = HttpBackend::new(&cfg.backend_config())?;
    log_backend_selected("http", Some(backend.base_url()), cfg.http_timeout_ms);
    Ok(Arc::new(backend))
}
