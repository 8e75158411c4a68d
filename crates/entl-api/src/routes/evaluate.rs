//! # Evaluation API
//!
//! - `POST /v1/tenants/{tenant_id}/evaluate`: one feature for one user
//! - `POST /v1/tenants/{tenant_id}/evaluate/batch`: several features for one user
//!
//! Decisions come from the tenant's cached snapshot. The cache is kept
//! current by a bus follower; if it trails the store when a request
//! arrives it is refreshed first, so operators see their own writes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use entl_core::{EntitlementError, FeatureName, Remediation, TenantId, UserId};
use entl_eval::Decision;

use crate::auth::Actor;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

const MAX_BATCH: usize = 100;

/// Evaluate one feature.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvaluateRequest {
    pub user_id: String,
    pub feature: String,
}

impl Validate for EvaluateRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("user_id", &self.user_id)?;
        require_non_blank("feature", &self.feature)
    }
}

/// Evaluate several features for one user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchEvaluateRequest {
    pub user_id: String,
    pub features: Vec<String>,
}

impl Validate for BatchEvaluateRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("user_id", &self.user_id)?;
        if self.features.is_empty() {
            return Err("features must not be empty".to_string());
        }
        if self.features.len() > MAX_BATCH {
            return Err(format!("features must not exceed {MAX_BATCH} entries"));
        }
        Ok(())
    }
}

/// A decision with the action that would change it.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EvaluationResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub decision: Decision,
    #[schema(value_type = String)]
    pub remediation: Remediation,
}

impl From<Decision> for EvaluationResponse {
    fn from(decision: Decision) -> Self {
        Self {
            remediation: decision.remediation(),
            decision,
        }
    }
}

/// Build the evaluation router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tenants/{tenant_id}/evaluate", post(evaluate))
        .route("/v1/tenants/{tenant_id}/evaluate/batch", post(evaluate_batch))
}

/// Evaluate `feature` for `user` through the tenant cache, then count and
/// sample the decision.
pub(crate) fn evaluate_for(
    state: &AppState,
    tenant_id: TenantId,
    user: &UserId,
    feature: &FeatureName,
    actor: &str,
) -> Result<Decision, AppError> {
    if state.store.get_tenant(tenant_id).is_none() {
        return Err(EntitlementError::not_found("tenant", tenant_id).into());
    }
    let cache = state
        .caches
        .get_or_follow(tenant_id, &state.store, &state.bus);
    let (tenant_sequence, global_sequence) = state.sequences(tenant_id);
    let view = cache.snapshot();
    if view.sequence < tenant_sequence || view.global_sequence < global_sequence {
        tracing::debug!(
            tenant_id = %tenant_id,
            cached = view.sequence,
            store = tenant_sequence,
            "tenant cache behind store, refreshing"
        );
        cache.replace(state.store.snapshot(tenant_id));
    }

    let decision = cache.evaluate(user, feature, state.store.now());
    metrics::counter!("entl_decisions_total", "reason" => decision.reason.as_str()).increment(1);

    if let Some(draft) = state.sampler.sample(&decision, actor) {
        match state.store.audit_log().record(draft, state.store.now()) {
            Ok(entry) => {
                if let Some(persistence) = &state.persistence {
                    persistence.persist_audit(vec![entry]);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to record sampled decision"),
        }
    }
    Ok(decision)
}

/// POST /v1/tenants/{tenant_id}/evaluate: Evaluate a feature for a user.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/evaluate",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Decision (allowed or denied)", body = EvaluationResponse),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "evaluation"
)]
pub(crate) async fn evaluate(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Json<EvaluationResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let user = UserId::new(req.user_id)?;
    let feature = FeatureName::new(req.feature)?;
    let decision = evaluate_for(&state, tenant_id, &user, &feature, actor.as_str())?;
    Ok(Json(decision.into()))
}

/// POST /v1/tenants/{tenant_id}/evaluate/batch: Evaluate several features.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/evaluate/batch",
    params(("tenant_id" = uuid::Uuid, Path, description = "Tenant ID")),
    request_body = BatchEvaluateRequest,
    responses(
        (status = 200, description = "Decisions in request order", body = [EvaluationResponse]),
        (status = 404, description = "Unknown tenant", body = crate::error::ErrorBody),
    ),
    tag = "evaluation"
)]
pub(crate) async fn evaluate_batch(
    State(state): State<AppState>,
    actor: Actor,
    Path(tenant_id): Path<TenantId>,
    body: Result<Json<BatchEvaluateRequest>, JsonRejection>,
) -> Result<Json<Vec<EvaluationResponse>>, AppError> {
    let req = extract_validated_json(body)?;
    let user = UserId::new(req.user_id)?;
    let features = req
        .features
        .into_iter()
        .map(FeatureName::new)
        .collect::<Result<Vec<_>, _>>()?;
    let decisions = features
        .iter()
        .map(|feature| {
            evaluate_for(&state, tenant_id, &user, feature, actor.as_str()).map(Into::into)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(decisions))
}
