//! # Tenant & License API
//!
//! - `POST /v1/tenants`: register a tenant on a plan
//! - `GET  /v1/tenants`: list tenants
//! - `GET  /v1/tenants/{tenant_id}`: fetch a tenant
//! - `GET  /v1/tenants/{tenant_id}/snapshot`: the tenant's evaluation view
//! - `POST /v1/tenants/{tenant_id}/licenses`: issue a license
//! - `GET  /v1/tenants/{tenant_id}/licenses`: list licenses
//! - `POST /v1/tenants/{tenant_id}/licenses/{license_id}/suspend`
//! - `POST /v1/tenants/{tenant_id}/licenses/{license_id}/reinstate`
//! - `POST /v1/tenants/{tenant_id}/licenses/{license_id}/revoke`
//! - `POST /v1/tenants/{tenant_id}/plan/upgrade`
//! - `POST /v1/tenants/{tenant_id}/plan/downgrade`

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use entl_core::{EntitlementError, LicenseId, PlanTier, TenantId};
use entl_eval::TenantSnapshot;
use entl_state::{License, NewLicense, SuspensionReason, Tenant, DEFAULT_PRODUCT};

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

// -- DTOs ---------------------------------------------------------------------

/// Request to register a tenant.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub name: String,
    /// `basic`, `premium` or `enterprise`.
    pub plan: String,
}

impl Validate for CreateTenantRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("name", &self.name)?;
        if self.name.len() > 255 {
            return Err("name must not exceed 255 characters".to_string());
        }
        Ok(())
    }
}

/// Request to issue a license.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueLicenseRequest {
    /// Product covered; defaults to the platform product.
    #[serde(default)]
    pub product: Option<String>,
    /// `basic`, `premium` or `enterprise`.
    pub tier: String,
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,
    pub max_activations: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grace_period_days: u32,
}

impl Validate for IssueLicenseRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(product) = &self.product {
            require_non_blank("product", product)?;
        }
        if self.limits.keys().any(|k| k.trim().is_empty()) {
            return Err("limit names must not be empty".to_string());
        }
        Ok(())
    }
}

/// Request to change the plan tier.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePlanRequest {
    /// Target tier.
    pub tier: String,
}

/// Request to suspend a license.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SuspendLicenseRequest {
    /// `operator` (default) or `payment_failed`.
    #[serde(default)]
    pub reason: Option<String>,
}

fn parse_tier(value: &str) -> Result<PlanTier, AppError> {
    Ok(value.parse::<PlanTier>()?)
}

fn require_tenant(state: &AppState, tenant_id: TenantId) -> Result<Tenant, AppError> {
    state
        .store
        .get_tenant(tenant_id)
        .map(|v| v.value)
        .ok_or_else(|| EntitlementError::not_found("tenant", tenant_id).into())
}

// -- Router -------------------------------------------------------------------

/// Build the tenants router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tenants", post(create_tenant).get(list_tenants))
        .route("/v1/tenants/{tenant_id}", get(get_tenant))
        .route("/v1/tenants/{tenant_id}/snapshot", get(get_snapshot))
        .route(
            "/v1/tenants/{tenant_id}/licenses",
            post(issue_license).get(list_licenses),
        )
        .route(
            "/v1/tenants/{tenant_id}/licenses/{license_id}/suspend",
            post(suspend_license),
        )
        .route(
            "/v1/tenants/{tenant_id}/licenses/{license_id}/reinstate",
            post(reinstate_license),
        )
        .route(
            "/v1/tenants/{tenant_id}/licenses/{license_id}/revoke",
            post(revoke_license),
        )
        .route("/v1/tenants/{tenant_id}/plan/upgrade", post(upgrade_plan))
        .route("/v1/tenants/{tenant_id}/plan/downgrade", post(downgrade_plan))
}

// -- Tenants ------------------------------------------------------------------

/// POST /v1/tenants: Register a tenant.
#[utoipa::path(
    post,
    path = "/v1/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = serde_json::Value),
        (status = 422, description = "Invalid input", body = crate::error::ErrorBody),
    ),
    tag = "tenants"
)]
pub(crate) async fn create_tenant(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Tenant>), AppError> {
    let req = extract_validated_json(body)?;
    let plan = parse_tier(&req.plan)?;
    let tenant = state.manager.create_tenant(&req.name, plan, actor.as_str())?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// GET /v1/tenants: List tenants.
#[utoipa::path(
    get,
    path = "/v1/tenants",
    responses((status = 200, description = "All tenants", body = serde_json::Value)),
    tag = "tenants"
)]
pub(crate) async fn list_tenants(State(state): State<AppState>) -> Json<Vec<Tenant>> {
    Json(state.store.list_tenants())
}

/// GET /v1/tenants/{tenant_id}: Fetch a tenant.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant found", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "tenants"
)]
pub(crate) async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<Tenant>, AppError> {
    Ok(Json(require_tenant(&state, tenant_id)?))
}

/// GET /v1/tenants/{tenant_id}/snapshot: The tenant's current evaluation view.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/snapshot",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tagged snapshot", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "tenants"
)]
pub(crate) async fn get_snapshot(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<TenantSnapshot>, AppError> {
    require_tenant(&state, tenant_id)?;
    Ok(Json(state.store.snapshot(tenant_id)))
}

// -- Licenses -----------------------------------------------------------------

/// POST /v1/tenants/{tenant_id}/licenses: Issue a license.
///
/// A live license for the same product is expired in the same commit.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/licenses",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = IssueLicenseRequest,
    responses(
        (status = 201, description = "License issued", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn issue_license(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<IssueLicenseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<License>), AppError> {
    let req = extract_validated_json(body)?;
    let request = NewLicense {
        product: req.product.unwrap_or_else(|| DEFAULT_PRODUCT.to_string()),
        tier: parse_tier(&req.tier)?,
        limits: req.limits,
        max_activations: req.max_activations,
        expires_at: req.expires_at,
        grace_period_days: req.grace_period_days,
    };
    let license = state.manager.issue_license(tenant_id, request, actor.as_str())?;
    Ok((StatusCode::CREATED, Json(license)))
}

/// GET /v1/tenants/{tenant_id}/licenses: List licenses.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/licenses",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses((status = 200, description = "Licenses", body = serde_json::Value)),
    tag = "licenses"
)]
pub(crate) async fn list_licenses(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<Vec<License>>, AppError> {
    require_tenant(&state, tenant_id)?;
    let licenses = state
        .store
        .list_licenses(tenant_id)
        .into_iter()
        .map(|v| v.value)
        .collect();
    Ok(Json(licenses))
}

/// POST /v1/tenants/{tenant_id}/licenses/{license_id}/suspend: Suspend a license.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/licenses/{license_id}/suspend",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("license_id" = uuid::Uuid, Path, description = "License ID"),
    ),
    request_body = SuspendLicenseRequest,
    responses(
        (status = 200, description = "License suspended", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn suspend_license(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, license_id)): Path<(TenantId, LicenseId)>,
    body: Option<Json<SuspendLicenseRequest>>,
) -> Result<Json<License>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reason = match req.reason.as_deref() {
        None | Some("operator") => SuspensionReason::Operator,
        Some("payment_failed") => SuspensionReason::PaymentFailed,
        Some(other) => {
            return Err(AppError::Validation(format!(
                "unknown suspension reason: {other}"
            )))
        }
    };
    let license = state
        .manager
        .suspend_license(tenant_id, license_id, reason, actor.as_str())?;
    Ok(Json(license))
}

/// POST /v1/tenants/{tenant_id}/licenses/{license_id}/reinstate: Reinstate a license.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/licenses/{license_id}/reinstate",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("license_id" = uuid::Uuid, Path, description = "License ID"),
    ),
    responses(
        (status = 200, description = "License reinstated", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn reinstate_license(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, license_id)): Path<(TenantId, LicenseId)>,
) -> Result<Json<License>, AppError> {
    let license = state
        .manager
        .reinstate_license(tenant_id, license_id, actor.as_str())?;
    Ok(Json(license))
}

/// POST /v1/tenants/{tenant_id}/licenses/{license_id}/revoke: Revoke a license.
///
/// Ends every activation held under the license.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/licenses/{license_id}/revoke",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("license_id" = uuid::Uuid, Path, description = "License ID"),
    ),
    responses(
        (status = 200, description = "License revoked", body = serde_json::Value),
        (status = 409, description = "Illegal transition", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn revoke_license(
    State(state): State<AppState>,
    actor: Actor,
    Path((tenant_id, license_id)): Path<(TenantId, LicenseId)>,
) -> Result<Json<License>, AppError> {
    let license = state
        .manager
        .revoke_license(tenant_id, license_id, actor.as_str())?;
    Ok(Json(license))
}

// -- Plan ---------------------------------------------------------------------

/// POST /v1/tenants/{tenant_id}/plan/upgrade: Upgrade the plan tier.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/plan/upgrade",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = ChangePlanRequest,
    responses(
        (status = 200, description = "License upgraded", body = serde_json::Value),
        (status = 409, description = "Not an upgrade", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn upgrade_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<ChangePlanRequest>, JsonRejection>,
) -> Result<Json<License>, AppError> {
    let req = extract_json(body)?;
    let tier = parse_tier(&req.tier)?;
    Ok(Json(state.manager.upgrade_plan(tenant_id, tier, actor.as_str())?))
}

/// POST /v1/tenants/{tenant_id}/plan/downgrade: Downgrade the plan tier.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/plan/downgrade",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = ChangePlanRequest,
    responses(
        (status = 200, description = "License downgraded", body = serde_json::Value),
        (status = 409, description = "Not a downgrade", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub(crate) async fn downgrade_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<ChangePlanRequest>, JsonRejection>,
) -> Result<Json<License>, AppError> {
    let req = extract_json(body)?;
    let tier = parse_tier(&req.tier)?;
    Ok(Json(
        state.manager.downgrade_plan(tenant_id, tier, actor.as_str())?,
    ))
}
