//! # entl-api: Axum Operator API
//!
//! The service layer of the entitlement engine, built on Axum/Tower/Tokio.
//! Assembles the route modules into a single application with shared
//! middleware for authentication, tracing, and metrics.
//!
//! ## Routes
//!
//! - `/v1/tenants/*`: tenants, licenses, plan changes, subscriptions,
//!   activations, effective flags, evaluation, usage
//! - `/v1/flags/*`: global and tenant flag management
//! - `/v1/activations/*`: heartbeats, deactivation, revocation
//! - `/v1/jobs`, `/v1/jobs/*`: archival worker queue and completion callbacks
//! - `/v1/billing/payments`: payment outcome webhook
//! - `/v1/audit/*`: audit queries and chain verification
//! - `/openapi.json`: generated OpenAPI 3.1 document
//! - `/health/*`, `/metrics`: probes and Prometheus scrape (unauthenticated)
//!
//! ## Middleware Stack (Tower)
//!
//! TraceLayer → MetricsLayer → AuthLayer
//!
//! ## Crate Policy
//!
//! - Sits at the top of the dependency DAG.
//! - No business logic in route handlers; they delegate to the lifecycle
//!   manager, the store, and the tenant caches.
//! - All errors map to structured HTTP responses via `AppError`.

pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod sweeper;

use axum::extract::State;
use axum::http::header;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;

pub use error::AppError;
pub use state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics = ApiMetrics::new();

    // Authenticated API routes.
    let api = Router::new()
        .merge(routes::tenants::router())
        .merge(routes::subscriptions::router())
        .merge(routes::activations::router())
        .merge(routes::flags::router())
        .merge(routes::evaluate::router())
        .merge(routes::usage::router())
        .merge(routes::audit::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(metrics))
        .with_state(state.clone());

    // Unauthenticated probes.
    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(health).merge(api)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: returns 200 when the application is ready to serve.
async fn readiness() -> &'static str {
    "ready"
}

/// Prometheus text exposition, 503 when no recorder is installed.
async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let handle = state
        .prometheus
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("metrics recorder not installed".into()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
