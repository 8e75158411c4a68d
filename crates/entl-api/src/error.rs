//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`EntitlementError`] to HTTP status codes and a JSON body with a
//! machine-readable code, a message, and, for client errors, details.
//! Internal error text never reaches the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use entl_core::{EntitlementError, ValidationError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "LIMIT_EXCEEDED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional context, present only for client errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Domain error from the entitlement engine.
    #[error(transparent)]
    Domain(#[from] EntitlementError),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Feature not configured on this instance (503).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500). Logged, never returned to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Domain(err) => (domain_status(err), err.code()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        let Self::Domain(err) = self else {
            return None;
        };
        let remediation = err.remediation();
        let extra = match err {
            EntitlementError::PlanInsufficient { required, current } => {
                json!({"upgrade_to": required, "current_tier": current})
            }
            EntitlementError::LimitExceeded { limit, current, max } => {
                json!({"limit": limit, "current": current, "max": max})
            }
            EntitlementError::InvalidTransition { from, to, .. } => {
                json!({"from": from, "to": to})
            }
            EntitlementError::LicenseInactive { status } => json!({"license_status": status}),
            _ => json!({}),
        };
        let mut details = json!({"remediation": remediation});
        if let (Some(target), serde_json::Value::Object(fields)) = (details.as_object_mut(), extra)
        {
            target.extend(fields);
        }
        Some(details)
    }
}

fn domain_status(err: &EntitlementError) -> StatusCode {
    match err {
        EntitlementError::PlanInsufficient { .. } => StatusCode::PAYMENT_REQUIRED,
        EntitlementError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        EntitlementError::InvalidTransition { .. }
        | EntitlementError::ConcurrentModification { .. }
        | EntitlementError::AlreadyExists { .. } => StatusCode::CONFLICT,
        EntitlementError::LicenseInactive { .. } => StatusCode::FORBIDDEN,
        EntitlementError::NotFound { .. } => StatusCode::NOT_FOUND,
        EntitlementError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EntitlementError::ArchivalFailed { .. } | EntitlementError::RestoreFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        } else if status.is_server_error() {
            tracing::warn!(code, error = %self, "request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entl_core::PlanTier;
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (
                EntitlementError::PlanInsufficient {
                    required: PlanTier::Premium,
                    current: PlanTier::Basic,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                EntitlementError::LimitExceeded {
                    limit: "activations".into(),
                    current: 1,
                    max: 1,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EntitlementError::InvalidTransition {
                    from: "active".into(),
                    to: "pending".into(),
                    reason: "no".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                EntitlementError::ConcurrentModification {
                    key: "k".into(),
                    attempts: 5,
                },
                StatusCode::CONFLICT,
            ),
            (
                EntitlementError::LicenseInactive {
                    status: "suspended".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (EntitlementError::not_found("tenant", "x"), StatusCode::NOT_FOUND),
            (
                EntitlementError::Validation(ValidationError::Rule("bad".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = AppError::from(err).status_and_code();
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn plan_errors_carry_upgrade_hint() {
        let (status, body) = response_parts(AppError::from(EntitlementError::PlanInsufficient {
            required: PlanTier::Premium,
            current: PlanTier::Basic,
        }))
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body.error.code, "PLAN_UPGRADE_REQUIRED");
        let details = body.error.details.unwrap();
        assert_eq!(details["upgrade_to"], "premium");
        assert_eq!(details["remediation"], "upgrade_required");
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (status, body) =
            response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert_eq!(body.error.message, "An internal error occurred");
        assert!(body.error.details.is_none());
    }

    #[tokio::test]
    async fn bad_request_has_no_details() {
        let (status, body) = response_parts(AppError::BadRequest("malformed".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.message.contains("malformed"));
        assert!(body.error.details.is_none());
    }
}
