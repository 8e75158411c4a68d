//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the operator API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Entitlement Engine API",
        version = "0.1.0",
        description = "Operator API for multi-tenant entitlements: tenants, licenses, subscriptions, activations, feature flags, evaluation, usage, billing webhooks and the audit log.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        // Tenants & licenses
        crate::routes::tenants::create_tenant,
        crate::routes::tenants::list_tenants,
        crate::routes::tenants::get_tenant,
        crate::routes::tenants::get_snapshot,
        crate::routes::tenants::issue_license,
        crate::routes::tenants::list_licenses,
        crate::routes::tenants::suspend_license,
        crate::routes::tenants::reinstate_license,
        crate::routes::tenants::revoke_license,
        crate::routes::tenants::upgrade_plan,
        crate::routes::tenants::downgrade_plan,
        // Subscriptions
        crate::routes::subscriptions::list_subscriptions,
        crate::routes::subscriptions::get_subscription,
        crate::routes::subscriptions::subscribe,
        crate::routes::subscriptions::unsubscribe,
        crate::routes::subscriptions::configure,
        crate::routes::subscriptions::reactivate,
        crate::routes::subscriptions::retry_archival,
        crate::routes::subscriptions::purge,
        crate::routes::subscriptions::list_jobs,
        crate::routes::subscriptions::list_all_jobs,
        crate::routes::subscriptions::complete_job,
        // Activations
        crate::routes::activations::activate,
        crate::routes::activations::list_activations,
        crate::routes::activations::heartbeat,
        crate::routes::activations::deactivate,
        crate::routes::activations::revoke,
        // Flags
        crate::routes::flags::create_flag,
        crate::routes::flags::list_flags,
        crate::routes::flags::edit_rollout,
        crate::routes::flags::set_enabled,
        crate::routes::flags::set_targets,
        crate::routes::flags::delete_flag,
        crate::routes::flags::effective_flags,
        // Evaluation
        crate::routes::evaluate::evaluate,
        crate::routes::evaluate::evaluate_batch,
        // Usage & billing
        crate::routes::usage::get_usage,
        crate::routes::usage::record_usage,
        crate::routes::usage::set_usage,
        crate::routes::usage::report_usage,
        crate::routes::usage::payment_webhook,
        // Audit
        crate::routes::audit::query_audit_log,
        crate::routes::audit::verify_chain,
    ),
    components(schemas(
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Tenant & license DTOs
        crate::routes::tenants::CreateTenantRequest,
        crate::routes::tenants::IssueLicenseRequest,
        crate::routes::tenants::ChangePlanRequest,
        crate::routes::tenants::SuspendLicenseRequest,
        // Subscription DTOs
        crate::routes::subscriptions::ConfigureRequest,
        crate::routes::subscriptions::CompleteJobRequest,
        // Activation DTOs
        crate::routes::activations::ActivateRequest,
        // Flag DTOs
        crate::routes::flags::CreateFlagRequest,
        crate::routes::flags::RolloutRequest,
        crate::routes::flags::EnabledRequest,
        crate::routes::flags::TargetsRequest,
        // Evaluation DTOs
        crate::routes::evaluate::EvaluateRequest,
        crate::routes::evaluate::BatchEvaluateRequest,
        crate::routes::evaluate::EvaluationResponse,
        // Usage & billing DTOs
        crate::routes::usage::RecordUsageRequest,
        crate::routes::usage::SetUsageRequest,
        crate::routes::usage::UsageCounter,
        crate::routes::usage::PaymentWebhook,
        crate::routes::usage::PaymentResponse,
    )),
    tags(
        (name = "tenants", description = "Tenant registration"),
        (name = "licenses", description = "License lifecycle and plan changes"),
        (name = "subscriptions", description = "App subscriptions, grace periods and archival"),
        (name = "activations", description = "Seat activations"),
        (name = "flags", description = "Feature flags and rollouts"),
        (name = "evaluation", description = "Entitlement decisions"),
        (name = "usage", description = "Metered usage and compliance"),
        (name = "billing", description = "Billing collaborator webhooks"),
        (name = "audit", description = "Audit log"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
