//! Application state and router assembly for the secure wrapper API.

use std::sync::Arc;

use axum::{
    Router,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

use crate::audit::AuditLog;
use crate::auth::admission_middleware;
use crate::config::{AppConfig, DataPaths};
use crate::handlers;
use crate::provider::{CliProvider, Provider};
use crate::quota::QuotaCounter;
use crate::ratelimit::RateLimiter;
use crate::replay::ReplayStore;
use crate::telemetry::trace_middleware;

/// Shared resources every handler and the admission middleware draw on.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub paths: Arc<DataPaths>,
    pub replay_store: Arc<ReplayStore>,
    pub send_quota: Arc<QuotaCounter>,
    pub calendar_quota: Arc<QuotaCounter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit_log: Arc<AuditLog>,
    pub provider: Arc<dyn Provider>,
}

impl AppState {
    pub fn new(config: AppConfig, paths: DataPaths) -> Self {
        let rate_limiter = RateLimiter::new(config.requests_per_minute);
        let provider: Arc<dyn Provider> = Arc::new(CliProvider::new(config.provider_binary.clone()));
        Self {
            replay_store: Arc::new(ReplayStore::new(paths.replay_dir.clone())),
            send_quota: Arc::new(QuotaCounter::new(paths.send_counter_path.clone())),
            calendar_quota: Arc::new(QuotaCounter::new(paths.calendar_counter_path.clone())),
            audit_log: Arc::new(AuditLog::new(paths.audit_path.clone())),
            rate_limiter: Arc::new(rate_limiter),
            provider,
            config: Arc::new(config),
            paths: Arc::new(paths),
        }
    }

    #[cfg(test)]
    pub fn for_test(config: AppConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir for test state");
        let data_dir = dir.into_path();
        let paths = DataPaths::resolve(&data_dir);
        Self::new(config, paths)
    }

    /// Test constructor with a scripted [`Provider`] substituted in place
    /// of the real CLI adapter.
    #[cfg(test)]
    pub fn for_test_with_provider(config: AppConfig, provider: Arc<dyn Provider>) -> Self {
        let mut state = Self::for_test(config);
        state.provider = provider;
        state
    }
}

/// Last-resort containment for a panic escaping a handler: logged, never
/// surfaced to the caller as anything but the same stable `upstream_failure`
/// envelope a provider or programming fault would produce.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let message = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %message, "request handler panicked");
    ApiError::upstream_failure().into_response()
}

/// Assembles the full `/v1/*` router behind the admission middleware, plus
/// the unauthenticated `/healthz` and `/v1/auth/token` routes.
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/email/unread", get(handlers::email::unread))
        .route("/v1/email/reply", post(handlers::email::reply))
        .route("/v1/email/send", post(handlers::email::send))
        .route("/v1/calendar/events", get(handlers::calendar::list))
        .route("/v1/calendar/events", post(handlers::calendar::create))
        .route("/v1/calendar/events/{id}", patch(handlers::calendar::update))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ));

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/v1/auth/token", post(handlers::auth_token::mint))
        .merge(protected)
        .fallback(handlers::health::not_found)
        .layer(axum::middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Starts the server bound to the configured address.
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("invalid bind address: {e}"))?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "secure wrapper listening");
    axum::serve(listener, app).await?;

    Ok(())
}
