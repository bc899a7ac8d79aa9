//! API error responses
//!
//! Every error leaves the server as structured `{error, message}` JSON.
//! The mapping from billing errors to status codes lives here and
//! nowhere else; handlers just use `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use deskbill_billing::BillingError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("unauthorized")]
    Unauthorized,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Billing(e) => match e {
                BillingError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                BillingError::InvoiceNotFound(_)
                | BillingError::TenantNotFound(_)
                | BillingError::PlanNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                BillingError::InvoiceAlreadyPaid(_) => (StatusCode::CONFLICT, "already_paid"),
                BillingError::InvalidPlanValue => (StatusCode::CONFLICT, "invalid_plan_value"),
                BillingError::LicenseMissing => (StatusCode::NOT_FOUND, "license_missing"),
                BillingError::LicenseInvalid(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "license_invalid")
                }
                BillingError::PrivateKeyUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "license_unavailable")
                }
                BillingError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
                BillingError::Database(_) | BillingError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        // Internals stay in the logs, not in the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        let cases = [
            (
                ApiError::Billing(BillingError::Validation("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Billing(BillingError::InvoiceNotFound(1)),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Billing(BillingError::InvoiceAlreadyPaid(1)),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Billing(BillingError::LicenseInvalid("x".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::Billing(BillingError::Provider("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_code().0, expected);
        }
    }
}
