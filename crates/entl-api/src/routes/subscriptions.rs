//! # Subscription & Archival Job API
//!
//! - `GET    /v1/tenants/{tenant_id}/subscriptions`
//! - `POST   /v1/tenants/{tenant_id}/subscriptions/{app_id}`: subscribe
//! - `DELETE /v1/tenants/{tenant_id}/subscriptions/{app_id}`: unsubscribe (grace period starts)
//! - `PUT    /v1/tenants/{tenant_id}/subscriptions/{app_id}/configuration`
//! - `POST   /v1/tenants/{tenant_id}/subscriptions/{app_id}/reactivate`
//! - `POST   /v1/tenants/{tenant_id}/subscriptions/{app_id}/retry-archival`
//! - `POST   /v1/tenants/{tenant_id}/subscriptions/{app_id}/purge`
//! - `GET    /v1/tenants/{tenant_id}/jobs`
//! - `GET    /v1/jobs?status=pending`: work queue for the archival worker
//! - `POST   /v1/jobs/{job_id}/complete`: archival collaborator callback

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use entl_core::{AppId, EntitlementError, JobId, TenantId};
use entl_lifecycle::JobOutcome;
use entl_state::{Configuration, JobRecord, JobStatus, Subscription};

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Configuration fields to merge into the subscription.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfigureRequest {
    /// Field name to value. Strings, integers, booleans, arrays and
    /// objects; floats are rejected.
    #[schema(value_type = Object)]
    pub fields: Configuration,
}

impl Validate for ConfigureRequest {
    fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("fields must not be empty".to_string());
        }
        if self.fields.keys().any(|k| k.trim().is_empty()) {
            return Err("field names must not be empty".to_string());
        }
        Ok(())
    }
}

/// Job listing filter.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobParams {
    /// `pending`, `completed`, `failed` or `superseded`. All jobs when
    /// absent.
    pub status: Option<String>,
}

impl JobParams {
    fn status(&self) -> Result<Option<JobStatus>, AppError> {
        self.status
            .as_deref()
            .map(|s| {
                serde_json::from_value(serde_json::Value::String(s.to_string()))
                    .map_err(|_| AppError::Validation(format!("unknown job status {s:?}")))
            })
            .transpose()
    }
}

/// Job completion reported by the archival collaborator.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteJobRequest {
    /// `completed` or `failed`.
    pub status: String,
    /// Handle of the archived data (archive jobs).
    #[serde(default)]
    pub data_ref: Option<String>,
    /// Failure reason (failed jobs).
    #[serde(default)]
    pub reason: Option<String>,
}

impl CompleteJobRequest {
    fn into_outcome(self) -> Result<JobOutcome, AppError> {
        match self.status.as_str() {
            "completed" => Ok(JobOutcome::Completed {
                data_ref: self.data_ref,
            }),
            "failed" => Ok(JobOutcome::Failed {
                reason: self
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "unspecified".to_string()),
            }),
            other => Err(AppError::Validation(format!(
                "status must be 'completed' or 'failed', got '{other}'"
            ))),
        }
    }
}

/// Build the subscriptions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/tenants/{tenant_id}/subscriptions",
            get(list_subscriptions),
        )
        .route(
            "/v1/tenants/{tenant_id}/subscriptions/{app_id}",
            post(subscribe).delete(unsubscribe).get(get_subscription),
        )
        .route(
            "/v1/tenants/{tenant_id}/subscriptions/{app_id}/configuration",
            put(configure),
        )
        .route(
            "/v1/tenants/{tenant_id}/subscriptions/{app_id}/reactivate",
            post(reactivate),
        )
        .route(
            "/v1/tenants/{tenant_id}/subscriptions/{app_id}/retry-archival",
            post(retry_archival),
        )
        .route(
            "/v1/tenants/{tenant_id}/subscriptions/{app_id}/purge",
            post(purge),
        )
        .route("/v1/tenants/{tenant_id}/jobs", get(list_jobs))
        .route("/v1/jobs", get(list_all_jobs))
        .route("/v1/jobs/{job_id}/complete", post(complete_job))
}

/// GET /v1/tenants/{tenant_id}/subscriptions: List subscriptions.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/subscriptions",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses((status = 200, description = "Subscriptions", body = serde_json::Value)),
    tag = "subscriptions"
)]
pub(crate) async fn list_subscriptions(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Json<Vec<Subscription>> {
    Json(
        state
            .store
            .list_subscriptions(tenant_id)
            .into_iter()
            .map(|v| v.value)
            .collect(),
    )
}

/// GET /v1/tenants/{tenant_id}/subscriptions/{app_id}: Fetch a subscription.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 200, description = "Subscription", body = serde_json::Value),
        (status = 404, description = "Not subscribed", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn get_subscription(
    State(state): State<AppState>,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<Json<Subscription>, AppError> {
    state
        .store
        .get_subscription(tenant_id, &app_id)
        .map(|v| Json(v.value))
        .ok_or_else(|| EntitlementError::not_found("subscription", &app_id).into())
}

/// POST /v1/tenants/{tenant_id}/subscriptions/{app_id}: Subscribe to an app.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 201, description = "Subscribed", body = serde_json::Value),
        (status = 402, description = "Plan upgrade required", body = crate::error::ErrorBody),
        (status = 403, description = "License inactive", body = crate::error::ErrorBody),
        (status = 409, description = "Already subscribed", body = crate::error::ErrorBody),
        (status = 429, description = "Limit exceeded", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn subscribe(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription = state.manager.subscribe(tenant_id, &app_id, actor.as_str())?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// DELETE /v1/tenants/{tenant_id}/subscriptions/{app_id}: Unsubscribe.
///
/// Access ends immediately; data is archived once the grace period lapses.
#[utoipa::path(
    delete,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 200, description = "Grace period started", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn unsubscribe(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        state.manager.unsubscribe(tenant_id, &app_id, actor.as_str())?,
    ))
}

/// PUT /v1/tenants/{tenant_id}/subscriptions/{app_id}/configuration: Merge configuration fields.
#[utoipa::path(
    put,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}/configuration",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    request_body = ConfigureRequest,
    responses(
        (status = 200, description = "Configuration updated", body = serde_json::Value),
        (status = 422, description = "Unsupported value", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn configure(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
    body: Result<Json<ConfigureRequest>, JsonRejection>,
) -> Result<Json<Subscription>, AppError> {
    let req = extract_validated_json(body)?;
    Ok(Json(state.manager.configure(
        tenant_id,
        &app_id,
        req.fields,
        actor.as_str(),
    )?))
}

/// POST /v1/tenants/{tenant_id}/subscriptions/{app_id}/reactivate: Reactivate.
///
/// Within the grace period access returns at once; after archival a
/// restore job runs first.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}/reactivate",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 200, description = "Reactivated or restoring", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn reactivate(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        state.manager.reactivate(tenant_id, &app_id, actor.as_str())?,
    ))
}

/// POST /v1/tenants/{tenant_id}/subscriptions/{app_id}/retry-archival: Retry a failed archival.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}/retry-archival",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 200, description = "Archival retried", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn retry_archival(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        state
            .manager
            .retry_archival(tenant_id, &app_id, actor.as_str())?,
    ))
}

/// POST /v1/tenants/{tenant_id}/subscriptions/{app_id}/purge: Drop archived data.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/subscriptions/{app_id}/purge",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("app_id" = String, Path, description = "App ID"),
    ),
    responses(
        (status = 200, description = "Archived data purged", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn purge(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, app_id)): Path<(TenantId, AppId)>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(state.manager.purge(tenant_id, &app_id, actor.as_str())?))
}

/// GET /v1/tenants/{tenant_id}/jobs: List archive and restore jobs.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/jobs",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses((status = 200, description = "Jobs", body = serde_json::Value)),
    tag = "subscriptions"
)]
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Json<Vec<JobRecord>> {
    Json(
        state
            .store
            .list_jobs(tenant_id)
            .into_iter()
            .map(|v| v.value)
            .collect(),
    )
}

/// GET /v1/jobs: Jobs across all tenants, oldest first.
#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(JobParams),
    responses(
        (status = 200, description = "Jobs", body = serde_json::Value),
        (status = 422, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn list_all_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobParams>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let status = params.status()?;
    let mut jobs: Vec<JobRecord> = state
        .store
        .list_tenants()
        .into_iter()
        .flat_map(|tenant| state.store.list_jobs(tenant.id))
        .map(|v| v.value)
        .filter(|job| status.map_or(true, |s| job.status == s))
        .collect();
    jobs.sort_by_key(|job| job.created_at);
    Ok(Json(jobs))
}

/// POST /v1/jobs/{job_id}/complete: Archival collaborator reports a finished job.
#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/complete",
    params(("job_id" = uuid::Uuid, Path, description = "Job ID")),
    request_body = CompleteJobRequest,
    responses(
        (status = 200, description = "Job recorded", body = serde_json::Value),
        (status = 404, description = "Unknown job", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn complete_job(
    State(state): State<AppState>,
    actor: Actor,
    Path(job_id): Path<JobId>,
    body: Result<Json<CompleteJobRequest>, JsonRejection>,
) -> Result<Json<JobRecord>, AppError> {
    let outcome = extract_json(body)?.into_outcome()?;
    Ok(Json(
        state
            .manager
            .job_completed(job_id, outcome, actor.as_str())?,
    ))
}
