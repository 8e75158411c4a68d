//! # Activation API
//!
//! Seat management for running application instances. Each activation
//! holds one slot of a license's `max_activations`.
//!
//! - `POST   /v1/tenants/{tenant_id}/activations`: take a slot
//! - `GET    /v1/tenants/{tenant_id}/activations`
//! - `POST   /v1/activations/{token}/heartbeat`
//! - `DELETE /v1/activations/{token}`: release the slot
//! - `POST   /v1/activations/{token}/revoke`: operator revocation

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use entl_core::{ActivationToken, TenantId};
use entl_state::{Activation, DEFAULT_PRODUCT};

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

/// Request to activate a device or instance.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActivateRequest {
    pub device_id: String,
    /// Product whose license provides the slot; defaults to the platform product.
    #[serde(default)]
    pub product: Option<String>,
}

impl Validate for ActivateRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("device_id", &self.device_id)?;
        if self.device_id.len() > 255 {
            return Err("device_id must not exceed 255 characters".to_string());
        }
        if let Some(product) = &self.product {
            require_non_blank("product", product)?;
        }
        Ok(())
    }
}

/// Build the activations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/tenants/{tenant_id}/activations",
            post(activate).get(list_activations),
        )
        .route("/v1/activations/{token}/heartbeat", post(heartbeat))
        .route("/v1/activations/{token}", axum::routing::delete(deactivate))
        .route("/v1/activations/{token}/revoke", post(revoke))
}

/// POST /v1/tenants/{tenant_id}/activations: Activate an instance.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/activations",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = ActivateRequest,
    responses(
        (status = 201, description = "Activation created", body = serde_json::Value),
        (status = 403, description = "License inactive", body = crate::error::ErrorBody),
        (status = 429, description = "No free activation slot", body = crate::error::ErrorBody),
    ),
    tag = "activations"
)]
pub(crate) async fn activate(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Activation>), AppError> {
    let req = extract_validated_json(body)?;
    let product = req.product.as_deref().unwrap_or(DEFAULT_PRODUCT);
    let activation =
        state
            .manager
            .activate(tenant_id, product, req.device_id.trim(), actor.as_str())?;
    Ok((StatusCode::CREATED, Json(activation)))
}

/// GET /v1/tenants/{tenant_id}/activations: List activations.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/activations",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses((status = 200, description = "Activations", body = serde_json::Value)),
    tag = "activations"
)]
pub(crate) async fn list_activations(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Json<Vec<Activation>> {
    Json(
        state
            .store
            .list_activations(tenant_id)
            .into_iter()
            .map(|v| v.value)
            .collect(),
    )
}

/// POST /v1/activations/{token}/heartbeat: Record a heartbeat.
#[utoipa::path(
    post,
    path = "/v1/activations/{token}/heartbeat",
    params(("token" = String, Path, description = "Activation token")),
    responses(
        (status = 200, description = "Heartbeat recorded", body = serde_json::Value),
        (status = 404, description = "Unknown token", body = crate::error::ErrorBody),
        (status = 409, description = "Activation ended", body = crate::error::ErrorBody),
    ),
    tag = "activations"
)]
pub(crate) async fn heartbeat(
    State(state): State<AppState>,
    actor: Actor,
    Path(token): Path<ActivationToken>,
) -> Result<Json<Activation>, AppError> {
    Ok(Json(state.manager.heartbeat(&token, actor.as_str())?))
}

/// DELETE /v1/activations/{token}: Release an activation slot.
#[utoipa::path(
    delete,
    path = "/v1/activations/{token}",
    params(("token" = String, Path, description = "Activation token")),
    responses(
        (status = 200, description = "Activation ended", body = serde_json::Value),
        (status = 404, description = "Unknown token", body = crate::error::ErrorBody),
    ),
    tag = "activations"
)]
pub(crate) async fn deactivate(
    State(state): State<AppState>,
    actor: Actor,
    Path(token): Path<ActivationToken>,
) -> Result<Json<Activation>, AppError> {
    Ok(Json(state.manager.deactivate(&token, actor.as_str())?))
}

/// POST /v1/activations/{token}/revoke: Revoke an activation.
#[utoipa::path(
    post,
    path = "/v1/activations/{token}/revoke",
    params(("token" = String, Path, description = "Activation token")),
    responses(
        (status = 200, description = "Activation revoked", body = serde_json::Value),
        (status = 404, description = "Unknown token", body = crate::error::ErrorBody),
    ),
    tag = "activations"
)]
pub(crate) async fn revoke(
    State(state): State<AppState>,
    actor: Actor,
    Path(token): Path<ActivationToken>,
) -> Result<Json<Activation>, AppError> {
    Ok(Json(
        state.manager.revoke_activation(&token, actor.as_str())?,
    ))
}
