//! # Integration Tests for entl-api
//!
//! Drives the full router with `oneshot`: tenant and license lifecycle,
//! flag rollouts and evaluation, seat activations, subscriptions and
//! reactivation, the payment webhook, the audit log, authentication, and
//! OpenAPI generation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use entl_api::state::{AppConfig, AppState, Collaborators};
use entl_eval::FeatureCatalog;

const CATALOG: &str = r#"
apps:
  - id: crm
    min_tier: basic
  - id: reports
    min_tier: premium
features:
  - name: advanced_analytics
    min_tier: premium
  - name: crm.contacts
    app: crm
    min_tier: basic
"#;

fn catalog() -> FeatureCatalog {
    FeatureCatalog::from_yaml_str(CATALOG).unwrap()
}

/// Helper: build the test app with auth disabled.
fn test_app() -> Router {
    let state = AppState::build(AppConfig::default(), catalog(), Collaborators::default());
    entl_api::app(state)
}

/// Helper: build the test app with auth enabled.
fn test_app_with_auth(token: &str) -> Router {
    let config = AppConfig {
        auth_token: Some(token.to_string()),
        ..AppConfig::default()
    };
    entl_api::app(AppState::build(config, catalog(), Collaborators::default()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

async fn put(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PUT", uri, Some(body)).await
}

/// Create a tenant with a platform license at `tier`; returns (tenant, license) ids.
async fn licensed_tenant(app: &Router, tier: &str, max_activations: u32) -> (String, String) {
    let (status, tenant) = post(app, "/v1/tenants", json!({"name": "acme", "plan": tier})).await;
    assert_eq!(status, StatusCode::CREATED, "{tenant}");
    let tenant_id = tenant["id"].as_str().unwrap().to_string();
    let (status, license) = post(
        app,
        &format!("/v1/tenants/{tenant_id}/licenses"),
        json!({
            "tier": tier,
            "limits": {"customers": 100},
            "max_activations": max_activations,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{license}");
    (tenant_id, license["id"].as_str().unwrap().to_string())
}

async fn evaluate(app: &Router, tenant: &str, user: &str, feature: &str) -> Value {
    let (status, decision) = post(
        app,
        &format!("/v1/tenants/{tenant}/evaluate"),
        json!({"user_id": user, "feature": feature}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{decision}");
    decision
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let (status, body) = get(&test_app(), "/health/liveness").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn test_readiness_probe() {
    let (status, body) = get(&test_app(), "/health/readiness").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ready".into()));
}

#[tokio::test]
async fn test_metrics_unavailable_without_recorder() {
    let (status, body) = get(&test_app(), "/metrics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let app = test_app_with_auth("secret-token");
    let (status, body) = get(&app, "/v1/tenants").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_valid_token_is_accepted() {
    let app = test_app_with_auth("secret-token");
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/tenants")
                .header("authorization", "Bearer secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_bypasses_auth() {
    let app = test_app_with_auth("secret-token");
    let (status, _) = get(&app, "/health/liveness").await;
    assert_eq!(status, StatusCode::OK);
}

// -- Tenants & Licenses -------------------------------------------------------

#[tokio::test]
async fn test_create_and_get_tenant() {
    let app = test_app();
    let (status, tenant) = post(&app, "/v1/tenants", json!({"name": "acme", "plan": "basic"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tenant["plan"], "basic");

    let id = tenant["id"].as_str().unwrap();
    let (status, fetched) = get(&app, &format!("/v1/tenants/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "acme");
}

#[tokio::test]
async fn test_unknown_tenant_is_404() {
    let app = test_app();
    let (status, body) = get(&app, "/v1/tenants/00000000-0000-0000-0000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_blank_tenant_name_is_422() {
    let app = test_app();
    let (status, _) = post(&app, "/v1/tenants", json!({"name": "  ", "plan": "basic"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/tenants")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_license_suspend_reinstate_and_invalid_transition() {
    let app = test_app();
    let (tenant, license) = licensed_tenant(&app, "basic", 2).await;
    let base = format!("/v1/tenants/{tenant}/licenses/{license}");

    let (status, body) = post(&app, &format!("{base}/reinstate"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = post(&app, &format!("{base}/suspend"), json!({"reason": "operator"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "suspended");

    let (status, body) = post(&app, &format!("{base}/reinstate"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_downgrade_to_higher_tier_is_rejected() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let (status, _) = post(
        &app,
        &format!("/v1/tenants/{tenant}/plan/downgrade"),
        json!({"tier": "premium"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Evaluation scenarios -----------------------------------------------------

#[tokio::test]
async fn test_zero_rollout_denies_every_user() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let (status, _) = post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "enabled": true, "rollout_percentage": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    for user in ["alice", "bob", "carol", "dave"] {
        let decision = evaluate(&app, &tenant, user, "advanced_analytics").await;
        assert_eq!(decision["allowed"], false);
        assert_eq!(decision["reason"], "NOT_IN_ROLLOUT");
        assert_eq!(decision["remediation"], "retry_later");
    }
}

#[tokio::test]
async fn test_upgrade_and_full_rollout_apply_on_next_evaluation() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "rollout_percentage": 0}),
    )
    .await;
    // Warm the tenant cache before the writes.
    evaluate(&app, &tenant, "alice", "advanced_analytics").await;

    let (status, license) = post(
        &app,
        &format!("/v1/tenants/{tenant}/plan/upgrade"),
        json!({"tier": "premium"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(license["tier"], "premium");
    let (status, flag) = put(
        &app,
        "/v1/flags/advanced_analytics/rollout",
        json!({"rollout_percentage": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flag["rollout_percentage"], 100);

    for user in ["alice", "bob", "carol"] {
        let decision = evaluate(&app, &tenant, user, "advanced_analytics").await;
        assert_eq!(decision["allowed"], true, "{decision}");
        assert_eq!(decision["reason"], "ROLLOUT");
    }
}

#[tokio::test]
async fn test_plan_insufficient_carries_upgrade_hint() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "rollout_percentage": 100}),
    )
    .await;
    let decision = evaluate(&app, &tenant, "alice", "advanced_analytics").await;
    assert_eq!(decision["allowed"], false);
    assert_eq!(decision["reason"], "PLAN_INSUFFICIENT");
    assert_eq!(decision["upgrade_hint"], "premium");
    assert_eq!(decision["remediation"], "upgrade_required");
}

#[tokio::test]
async fn test_batch_evaluation_preserves_order() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "premium", 1).await;
    post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "rollout_percentage": 100}),
    )
    .await;
    let (status, decisions) = post(
        &app,
        &format!("/v1/tenants/{tenant}/evaluate/batch"),
        json!({"user_id": "alice", "features": ["advanced_analytics", "unknown_feature"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decisions[0]["reason"], "ROLLOUT");
    assert_eq!(decisions[1]["reason"], "FLAG_DISABLED");
}

#[tokio::test]
async fn test_tenant_flag_overrides_global_flag() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "premium", 1).await;
    post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "rollout_percentage": 100}),
    )
    .await;
    let (status, _) = post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "tenant_id": tenant, "enabled": false, "rollout_percentage": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, flags) = get(&app, &format!("/v1/tenants/{tenant}/flags")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flags[0]["enabled"], false);

    let decision = evaluate(&app, &tenant, "alice", "advanced_analytics").await;
    assert_eq!(decision["reason"], "FLAG_DISABLED");
}

#[tokio::test]
async fn test_rollout_above_100_is_422() {
    let app = test_app();
    let (status, _) = post(
        &app,
        "/v1/flags",
        json!({"name": "advanced_analytics", "rollout_percentage": 101}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Activations --------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_activations_respect_seat_limit() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let uri = format!("/v1/tenants/{tenant}/activations");

    let (first, second) = tokio::join!(
        post(&app, &uri, json!({"device_id": "laptop-1"})),
        post(&app, &uri, json!({"device_id": "laptop-2"})),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::TOO_MANY_REQUESTS]);
    let rejected = if first.0 == StatusCode::TOO_MANY_REQUESTS { first.1 } else { second.1 };
    assert_eq!(rejected["error"]["code"], "LIMIT_EXCEEDED");

    let (_, activations) = get(&app, &uri).await;
    assert_eq!(activations.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deactivation_frees_the_seat() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let uri = format!("/v1/tenants/{tenant}/activations");

    let (_, activation) = post(&app, &uri, json!({"device_id": "laptop-1"})).await;
    let token = activation["token"].as_str().unwrap();
    let (status, _) = post(&app, &format!("/v1/activations/{token}/heartbeat"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, ended) = send(&app, "DELETE", &format!("/v1/activations/{token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "deactivated");

    let (status, _) = post(&app, &uri, json!({"device_id": "laptop-2"})).await;
    assert_eq!(status, StatusCode::CREATED);
}

// -- Subscriptions ------------------------------------------------------------

#[tokio::test]
async fn test_subscribe_requires_sufficient_plan() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let (status, body) = post(&app, &format!("/v1/tenants/{tenant}/subscriptions/reports"), json!({})).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "PLAN_UPGRADE_REQUIRED");
}

#[tokio::test]
async fn test_subscribe_requires_active_license() {
    let app = test_app();
    let (tenant, license) = licensed_tenant(&app, "basic", 1).await;
    post(
        &app,
        &format!("/v1/tenants/{tenant}/licenses/{license}/suspend"),
        json!({}),
    )
    .await;
    let (status, body) = post(&app, &format!("/v1/tenants/{tenant}/subscriptions/crm"), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "LICENSE_INACTIVE");
}

#[tokio::test]
async fn test_unsubscribe_then_reactivate_restores_access() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    post(&app, "/v1/flags", json!({"name": "crm.contacts", "rollout_percentage": 100})).await;
    let sub_uri = format!("/v1/tenants/{tenant}/subscriptions/crm");

    let (status, sub) = post(&app, &sub_uri, json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sub["status"], "active");
    assert_eq!(evaluate(&app, &tenant, "alice", "crm.contacts").await["allowed"], true);

    let (status, sub) = send(&app, "DELETE", &sub_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sub["status"], "suspended_grace");
    let decision = evaluate(&app, &tenant, "alice", "crm.contacts").await;
    assert_eq!(decision["allowed"], false);
    assert_eq!(decision["reason"], "APP_NOT_SUBSCRIBED");

    let (status, sub) = post(&app, &format!("{sub_uri}/reactivate"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["status"], "reactivating");
    assert_eq!(evaluate(&app, &tenant, "alice", "crm.contacts").await["allowed"], false);

    let job = sub["pending_job"].as_str().unwrap();
    let (status, record) = post(
        &app,
        &format!("/v1/jobs/{job}/complete"),
        json!({"status": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{record}");

    let (_, sub) = get(&app, &sub_uri).await;
    assert_eq!(sub["status"], "active");
    assert_eq!(evaluate(&app, &tenant, "alice", "crm.contacts").await["allowed"], true);
}

#[tokio::test]
async fn test_worker_polls_pending_jobs_and_reports_back() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let sub_uri = format!("/v1/tenants/{tenant}/subscriptions/crm");
    post(&app, &sub_uri, json!({})).await;
    send(&app, "DELETE", &sub_uri, None).await;

    let (status, jobs) = get(&app, "/v1/jobs?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["kind"], "archive");
    assert_eq!(jobs[0]["tenant_id"], tenant.as_str());

    let job = jobs[0]["id"].as_str().unwrap();
    let (status, _) = post(
        &app,
        &format!("/v1/jobs/{job}/complete"),
        json!({"status": "completed", "data_ref": "s3://archive/crm"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, pending) = get(&app, "/v1/jobs?status=pending").await;
    assert!(pending.as_array().unwrap().is_empty());
    let (_, completed) = get(&app, "/v1/jobs?status=completed").await;
    assert_eq!(completed.as_array().unwrap().len(), 1);

    let (status, body) = get(&app, "/v1/jobs?status=someday").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_job_completion_rejects_unknown_status() {
    let app = test_app();
    let (status, _) = post(
        &app,
        "/v1/jobs/00000000-0000-0000-0000-000000000000/complete",
        json!({"status": "maybe"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Usage & Billing ----------------------------------------------------------

#[tokio::test]
async fn test_usage_over_limit_flags_license() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;
    let (status, counter) = put(
        &app,
        &format!("/v1/tenants/{tenant}/usage/customers"),
        json!({"value": 150}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counter["value"], 150);

    let (status, report) = post(&app, &format!("/v1/tenants/{tenant}/usage/report"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["signals"].as_array().unwrap().len(), 1);

    let (_, licenses) = get(&app, &format!("/v1/tenants/{tenant}/licenses")).await;
    assert_eq!(licenses[0]["exceeded_limits"], json!(["customers"]));
    assert_eq!(licenses[0]["status"], "active");
}

#[tokio::test]
async fn test_payment_failure_suspends_and_success_reinstates() {
    let app = test_app();
    let (tenant, _) = licensed_tenant(&app, "basic", 1).await;

    let (status, body) = post(
        &app,
        "/v1/billing/payments",
        json!({"tenant_id": tenant, "success": false, "failure_reason": "card declined"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changed"], true);
    assert_eq!(body["license"]["status"], "suspended");

    let (_, body) = post(
        &app,
        "/v1/billing/payments",
        json!({"tenant_id": tenant, "success": true}),
    )
    .await;
    assert_eq!(body["changed"], true);
    assert_eq!(body["license"]["status"], "active");
}

// -- Audit Log ----------------------------------------------------------------

#[tokio::test]
async fn test_audit_log_records_actor_and_verifies() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/tenants")
                .header("content-type", "application/json")
                .header("x-actor", "ops@example.com")
                .body(Body::from(r#"{"name":"acme","plan":"basic"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let (status, entries) = get(&app, "/v1/audit?action=tenant_created").await;
    assert_eq!(status, StatusCode::OK);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["actor"], "ops@example.com");

    let (status, verification) = get(&app, "/v1/audit/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["chain_valid"], true);
}

#[tokio::test]
async fn test_audit_limit_out_of_range_is_422() {
    let (status, _) = get(&test_app(), "/v1/audit?limit=5000").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_spec_lists_routes() {
    let (status, spec) = get(&test_app(), "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    let paths = spec["paths"].as_object().unwrap();
    assert!(paths.contains_key("/v1/tenants"));
    assert!(paths.contains_key("/v1/tenants/{tenant_id}/evaluate"));
    assert!(paths.contains_key("/v1/audit/verify"));
}
