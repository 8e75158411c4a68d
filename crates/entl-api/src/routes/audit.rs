//! # Audit Log API
//!
//! - `GET /v1/audit?tenant_id=&since=&action=&limit=`: query entries
//! - `GET /v1/audit/verify`: verify the hash chain

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use entl_audit::{AuditAction, AuditEntry, AuditQuery, ChainVerification};
use entl_core::TenantId;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Audit query parameters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditParams {
    /// Only entries for this tenant.
    #[param(value_type = Option<String>)]
    pub tenant_id: Option<TenantId>,
    /// Only entries at or after this instant (RFC 3339).
    pub since: Option<DateTime<Utc>>,
    /// Only entries with this action, e.g. `license_transition`.
    pub action: Option<String>,
    /// Most recent entries to return (default 100, max 1000).
    pub limit: Option<usize>,
}

impl AuditParams {
    fn into_query(self) -> Result<AuditQuery, AppError> {
        let action = self
            .action
            .as_deref()
            .map(str::parse::<AuditAction>)
            .transpose()?;
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok(AuditQuery {
            tenant_id: self.tenant_id,
            since: self.since,
            action,
            limit: Some(limit),
        })
    }
}

/// Build the audit router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit", get(query_audit_log))
        .route("/v1/audit/verify", get(verify_chain))
}

/// GET /v1/audit: Query the audit log.
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(AuditParams),
    responses(
        (status = 200, description = "Matching entries in append order", body = serde_json::Value),
        (status = 422, description = "Invalid filter", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub(crate) async fn query_audit_log(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.store.audit_log().query(&query)))
}

/// GET /v1/audit/verify: Verify the audit hash chain.
#[utoipa::path(
    get,
    path = "/v1/audit/verify",
    responses((status = 200, description = "Verification result", body = serde_json::Value)),
    tag = "audit"
)]
pub(crate) async fn verify_chain(State(state): State<AppState>) -> Json<ChainVerification> {
    let result = state.store.audit_log().verify_chain();
    if !result.chain_valid {
        tracing::error!(
            first_broken = ?result.first_broken,
            broken_links = result.broken_links,
            "audit chain verification failed"
        );
    }
    Json(result)
}
