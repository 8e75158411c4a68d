//! # Feature Flag API
//!
//! Global flags live in the global partition; a tenant flag with the same
//! name overrides the global one for that tenant. Every edit reaches
//! application caches through the propagation bus.
//!
//! - `POST   /v1/flags`: create a global or tenant flag
//! - `GET    /v1/flags?tenant_id=`: flags stored in one scope
//! - `PUT    /v1/flags/{name}/rollout`
//! - `PUT    /v1/flags/{name}/enabled`
//! - `PUT    /v1/flags/{name}/targets`
//! - `DELETE /v1/flags/{name}?tenant_id=`
//! - `GET    /v1/tenants/{tenant_id}/flags`: effective flags for a tenant

use std::collections::BTreeSet;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use entl_core::{EntitlementError, FeatureName, TenantId, UserId};
use entl_eval::{FeatureFlag, RolloutPercentage};
use entl_lifecycle::NewFlag;

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Upper bound on explicit targets per flag.
const MAX_TARGETS: usize = 10_000;

// -- DTOs ---------------------------------------------------------------------

/// Request to create a flag.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateFlagRequest {
    pub name: String,
    /// Owning tenant; omit for a global flag.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub tenant_id: Option<TenantId>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Share of users, 0 to 100.
    pub rollout_percentage: u32,
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl Validate for CreateFlagRequest {
    fn validate(&self) -> Result<(), String> {
        if self.target_user_ids.len() > MAX_TARGETS {
            return Err(format!("target_user_ids must not exceed {MAX_TARGETS} entries"));
        }
        Ok(())
    }
}

impl CreateFlagRequest {
    fn into_new_flag(self) -> Result<NewFlag, AppError> {
        Ok(NewFlag {
            tenant_id: self.tenant_id,
            name: FeatureName::new(self.name)?,
            enabled: self.enabled,
            rollout_percentage: RolloutPercentage::new(self.rollout_percentage)?,
            target_user_ids: parse_users(self.target_user_ids)?,
            expires_at: self.expires_at,
        })
    }
}

/// Scope of a flag edit.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FlagScope {
    /// Tenant whose flag to address; omit for the global flag.
    #[param(value_type = Option<String>)]
    pub tenant_id: Option<TenantId>,
}

/// New rollout percentage.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RolloutRequest {
    /// 0 to 100.
    pub rollout_percentage: u32,
}

/// Enable or disable a flag.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// Replace the explicit target list.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TargetsRequest {
    pub target_user_ids: Vec<String>,
}

impl Validate for TargetsRequest {
    fn validate(&self) -> Result<(), String> {
        if self.target_user_ids.len() > MAX_TARGETS {
            return Err(format!("target_user_ids must not exceed {MAX_TARGETS} entries"));
        }
        Ok(())
    }
}

fn parse_users(raw: Vec<String>) -> Result<BTreeSet<UserId>, AppError> {
    raw.into_iter()
        .map(|u| UserId::new(u).map_err(AppError::from))
        .collect()
}

fn parse_name(raw: String) -> Result<FeatureName, AppError> {
    Ok(FeatureName::new(raw)?)
}

// -- Router -------------------------------------------------------------------

/// Build the flags router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/flags", post(create_flag).get(list_flags))
        .route("/v1/flags/{name}/rollout", put(edit_rollout))
        .route("/v1/flags/{name}/enabled", put(set_enabled))
        .route("/v1/flags/{name}/targets", put(set_targets))
        .route("/v1/flags/{name}", delete(delete_flag))
        .route("/v1/tenants/{tenant_id}/flags", get(effective_flags))
}

/// POST /v1/flags: Create a feature flag.
#[utoipa::path(
    post,
    path = "/v1/flags",
    request_body = CreateFlagRequest,
    responses(
        (status = 201, description = "Flag created", body = serde_json::Value),
        (status = 409, description = "Flag exists in this scope", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid flag", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn create_flag(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<CreateFlagRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeatureFlag>), AppError> {
    let new = extract_validated_json(body)?.into_new_flag()?;
    let flag = state.manager.create_flag(new, actor.as_str())?;
    Ok((StatusCode::CREATED, Json(flag)))
}

/// GET /v1/flags: Flags stored in one scope.
#[utoipa::path(
    get,
    path = "/v1/flags",
    params(FlagScope),
    responses((status = 200, description = "Flags", body = serde_json::Value)),
    tag = "flags"
)]
pub(crate) async fn list_flags(
    State(state): State<AppState>,
    Query(scope): Query<FlagScope>,
) -> Json<Vec<FeatureFlag>> {
    Json(
        state
            .store
            .list_flags(scope.tenant_id)
            .into_iter()
            .map(|v| v.value)
            .collect(),
    )
}

/// PUT /v1/flags/{name}/rollout: Edit the rollout percentage.
#[utoipa::path(
    put,
    path = "/v1/flags/{name}/rollout",
    params(("name" = String, Path, description = "Flag name"), FlagScope),
    request_body = RolloutRequest,
    responses(
        (status = 200, description = "Flag updated", body = serde_json::Value),
        (status = 404, description = "Unknown flag", body = crate::error::ErrorBody),
        (status = 422, description = "Percentage out of range", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn edit_rollout(
    State(state): State<AppState>,
    actor: Actor,
    Path(name): Path<String>,
    Query(scope): Query<FlagScope>,
    body: Result<Json<RolloutRequest>, JsonRejection>,
) -> Result<Json<FeatureFlag>, AppError> {
    let req = extract_json(body)?;
    let percentage = RolloutPercentage::new(req.rollout_percentage)?;
    let flag = state.manager.edit_rollout_percentage(
        scope.tenant_id,
        &parse_name(name)?,
        percentage,
        actor.as_str(),
    )?;
    Ok(Json(flag))
}

/// PUT /v1/flags/{name}/enabled: Enable or disable a flag.
#[utoipa::path(
    put,
    path = "/v1/flags/{name}/enabled",
    params(("name" = String, Path, description = "Flag name"), FlagScope),
    request_body = EnabledRequest,
    responses(
        (status = 200, description = "Flag updated", body = serde_json::Value),
        (status = 404, description = "Unknown flag", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn set_enabled(
    State(state): State<AppState>,
    actor: Actor,
    Path(name): Path<String>,
    Query(scope): Query<FlagScope>,
    body: Result<Json<EnabledRequest>, JsonRejection>,
) -> Result<Json<FeatureFlag>, AppError> {
    let req = extract_json(body)?;
    let flag = state.manager.set_flag_enabled(
        scope.tenant_id,
        &parse_name(name)?,
        req.enabled,
        actor.as_str(),
    )?;
    Ok(Json(flag))
}

/// PUT /v1/flags/{name}/targets: Replace the explicit target list.
#[utoipa::path(
    put,
    path = "/v1/flags/{name}/targets",
    params(("name" = String, Path, description = "Flag name"), FlagScope),
    request_body = TargetsRequest,
    responses(
        (status = 200, description = "Flag updated", body = serde_json::Value),
        (status = 404, description = "Unknown flag", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn set_targets(
    State(state): State<AppState>,
    actor: Actor,
    Path(name): Path<String>,
    Query(scope): Query<FlagScope>,
    body: Result<Json<TargetsRequest>, JsonRejection>,
) -> Result<Json<FeatureFlag>, AppError> {
    let req = extract_validated_json(body)?;
    let flag = state.manager.set_flag_targets(
        scope.tenant_id,
        &parse_name(name)?,
        parse_users(req.target_user_ids)?,
        actor.as_str(),
    )?;
    Ok(Json(flag))
}

/// DELETE /v1/flags/{name}: Delete a flag.
///
/// Deleting a tenant flag makes the global flag of that name apply again.
#[utoipa::path(
    delete,
    path = "/v1/flags/{name}",
    params(("name" = String, Path, description = "Flag name"), FlagScope),
    responses(
        (status = 200, description = "Flag deleted", body = serde_json::Value),
        (status = 404, description = "Unknown flag", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn delete_flag(
    State(state): State<AppState>,
    actor: Actor,
    Path(name): Path<String>,
    Query(scope): Query<FlagScope>,
) -> Result<Json<FeatureFlag>, AppError> {
    let flag = state
        .manager
        .delete_flag(scope.tenant_id, &parse_name(name)?, actor.as_str())?;
    Ok(Json(flag))
}

/// GET /v1/tenants/{tenant_id}/flags: Effective flags for a tenant.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/flags",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Globals with tenant overrides applied", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "flags"
)]
pub(crate) async fn effective_flags(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<Vec<FeatureFlag>>, AppError> {
    if state.store.get_tenant(tenant_id).is_none() {
        return Err(EntitlementError::not_found("tenant", tenant_id).into());
    }
    Ok(Json(state.store.get_flags(tenant_id)))
}
