//! Request authentication
//!
//! Two schemes: admin routes take a shared token compared in constant
//! time; tenant routes take the tenant's own API key in `X-Api-Key`.

use axum::http::HeaderMap;
use deskbill_billing::TenantBilling;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const API_KEY_HEADER: &str = "x-api-key";

/// Constant-time token equality; length mismatch short-circuits but
/// leaks only the length, which the attacker already controls.
fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if state.config.admin_token.is_empty() || !tokens_match(provided, &state.config.admin_token) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

pub async fn require_tenant(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<TenantBilling, ApiError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)?;
    state
        .billing
        .store
        .tenant_by_api_key(api_key)
        .await?
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secret", "secres"));
        assert!(!tokens_match("secret", "secret2"));
        assert!(!tokens_match("", "secret"));
    }
}
