//! # Usage & Billing API
//!
//! - `GET  /v1/tenants/{tenant_id}/usage`: current counters
//! - `POST /v1/tenants/{tenant_id}/usage`: add to a counter
//! - `PUT  /v1/tenants/{tenant_id}/usage/{limit}`: overwrite a counter
//! - `POST /v1/tenants/{tenant_id}/usage/report`: report now and apply compliance signals
//! - `POST /v1/billing/payments`: payment outcome webhook
//!
//! Exceeding a limit flags the license for compliance; it never revokes
//! anything already granted.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use entl_core::{EntitlementError, TenantId};
use entl_lifecycle::PaymentResult;
use entl_state::License;
use entl_usage::UsageReport;

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;
use crate::sweeper::report_tenant;

/// Increment a usage counter.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordUsageRequest {
    pub limit: String,
    pub amount: u64,
}

impl Validate for RecordUsageRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("limit", &self.limit)
    }
}

/// Absolute counter reading.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetUsageRequest {
    pub value: u64,
}

/// A counter after an update.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageCounter {
    pub limit: String,
    pub value: u64,
}

/// Payment outcome from the billing collaborator.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentWebhook {
    #[schema(value_type = String)]
    pub tenant_id: TenantId,
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Product paid for; defaults to the platform product.
    #[serde(default)]
    pub product: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Validate for PaymentWebhook {
    fn validate(&self) -> Result<(), String> {
        if let Some(product) = &self.product {
            require_non_blank("product", product)?;
        }
        Ok(())
    }
}

/// Result of applying a payment outcome.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    /// Whether the license status changed.
    pub changed: bool,
    /// The license after the change.
    #[schema(value_type = Option<Object>)]
    pub license: Option<License>,
}

fn require_tenant(state: &AppState, tenant_id: TenantId) -> Result<(), AppError> {
    match state.store.get_tenant(tenant_id) {
        Some(_) => Ok(()),
        None => Err(EntitlementError::not_found("tenant", tenant_id).into()),
    }
}

/// Build the usage and billing router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/tenants/{tenant_id}/usage",
            post(record_usage).get(get_usage),
        )
        .route("/v1/tenants/{tenant_id}/usage/{limit}", put(set_usage))
        .route("/v1/tenants/{tenant_id}/usage/report", post(report_usage))
        .route("/v1/billing/payments", post(payment_webhook))
}

/// GET /v1/tenants/{tenant_id}/usage: Current usage counters.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/usage",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Counters by limit name", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "usage"
)]
pub(crate) async fn get_usage(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<BTreeMap<String, u64>>, AppError> {
    require_tenant(&state, tenant_id)?;
    Ok(Json(state.reporter.ledger().counters(tenant_id)))
}

/// POST /v1/tenants/{tenant_id}/usage: Add to a usage counter.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/usage",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = RecordUsageRequest,
    responses(
        (status = 200, description = "Counter updated", body = UsageCounter),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "usage"
)]
pub(crate) async fn record_usage(
    State(state): State<AppState>,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<RecordUsageRequest>, JsonRejection>,
) -> Result<Json<UsageCounter>, AppError> {
    let req = extract_validated_json(body)?;
    require_tenant(&state, tenant_id)?;
    let limit = req.limit.trim().to_string();
    let value = state.reporter.ledger().record(tenant_id, &limit, req.amount);
    Ok(Json(UsageCounter { limit, value }))
}

/// PUT /v1/tenants/{tenant_id}/usage/{limit}: Overwrite a usage counter.
#[utoipa::path(
    put,
    path = "/v1/tenants/{tenant_id}/usage/{limit}",
    params(
        ("tenant_id" = uuid::Uuid, Path, description = "Tenant ID"),
        ("limit" = String, Path, description = "Limit name"),
    ),
    request_body = SetUsageRequest,
    responses(
        (status = 200, description = "Counter set", body = UsageCounter),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "usage"
)]
pub(crate) async fn set_usage(
    State(state): State<AppState>,
    Path((tenant_id, limit)): Path<(TenantId, String)>,
    body: Result<Json<SetUsageRequest>, JsonRejection>,
) -> Result<Json<UsageCounter>, AppError> {
    let req = crate::extractors::extract_json(body)?;
    require_non_blank("limit", &limit).map_err(AppError::Validation)?;
    require_tenant(&state, tenant_id)?;
    state.reporter.ledger().set(tenant_id, &limit, req.value);
    Ok(Json(UsageCounter {
        limit,
        value: req.value,
    }))
}

/// POST /v1/tenants/{tenant_id}/usage/report: Report usage now.
///
/// Snapshots go to the billing sink; compliance signals are applied to
/// the license.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/usage/report",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Snapshots and signals", body = serde_json::Value),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "usage"
)]
pub(crate) async fn report_usage(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
) -> Result<Json<UsageReport>, AppError> {
    require_tenant(&state, tenant_id)?;
    Ok(Json(report_tenant(&state, tenant_id, actor.as_str())?))
}

/// POST /v1/billing/payments: Payment outcome webhook.
///
/// A failure suspends the license. A later success reinstates it only if
/// the suspension was caused by payment.
#[utoipa::path(
    post,
    path = "/v1/billing/payments",
    request_body = PaymentWebhook,
    responses(
        (status = 200, description = "Payment applied", body = PaymentResponse),
        (status = 404, description = "No live license", body = crate::error::ErrorBody),
    ),
    tag = "billing"
)]
pub(crate) async fn payment_webhook(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<PaymentWebhook>, JsonRejection>,
) -> Result<Json<PaymentResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let payment = PaymentResult {
        tenant_id: req.tenant_id,
        subscription_id: req.subscription_id,
        product: req.product,
        success: req.success,
        failure_reason: req.failure_reason,
    };
    let license = state
        .manager
        .payment_status_changed(&payment, actor.as_str())?;
    Ok(Json(PaymentResponse {
        changed: license.is_some(),
        license,
    }))
}
