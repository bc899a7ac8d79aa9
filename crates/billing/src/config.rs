//! Billing configuration
//!
//! All configuration enters through [`BillingConfig`], a plain value
//! object built once from the environment and passed explicitly into
//! services. Nothing in this crate reads the environment at request
//! time.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;

use crate::error::{BillingError, BillingResult};

/// Where a PEM key comes from.
///
/// Resolution is cheap (no network I/O) and happens once per call so a
/// rotated key file is picked up without a restart.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// PEM text supplied inline.
    Inline(String),
    /// Base64-encoded PEM text.
    Base64(String),
    /// Filesystem path to a PEM file.
    Path(PathBuf),
}

impl KeySource {
    /// Read the three env variants in precedence order:
    /// inline PEM, then base64, then path.
    fn from_env(inline_var: &str, base64_var: &str, path_var: &str) -> Option<Self> {
        if let Ok(pem) = std::env::var(inline_var) {
            if !pem.trim().is_empty() {
                return Some(KeySource::Inline(pem));
            }
        }
        if let Ok(b64) = std::env::var(base64_var) {
            if !b64.trim().is_empty() {
                return Some(KeySource::Base64(b64));
            }
        }
        if let Ok(path) = std::env::var(path_var) {
            if !path.trim().is_empty() {
                return Some(KeySource::Path(PathBuf::from(path)));
            }
        }
        None
    }

    /// Resolve to PEM bytes. Absent files and bad base64 are reported
    /// as errors, not panics; callers map them onto the right license
    /// error variant.
    pub fn resolve(&self) -> BillingResult<Vec<u8>> {
        match self {
            KeySource::Inline(pem) => Ok(pem.clone().into_bytes()),
            KeySource::Base64(b64) => base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| BillingError::Internal(format!("invalid base64 key material: {e}"))),
            KeySource::Path(path) => std::fs::read(path).map_err(|e| {
                BillingError::Internal(format!("key file {} unreadable: {e}", path.display()))
            }),
        }
    }
}

/// Payment provider connection settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Bearer token used for payment lookups and preference creation.
    pub access_token: String,
    /// Hard timeout for every provider call. A timed-out call is a
    /// transient failure, never a negative payment result.
    pub timeout: Duration,
}

/// Billing subsystem configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Private key for license issuance (optional: issuance disabled
    /// without it).
    pub license_private_key: Option<KeySource>,
    /// Public key for license verification.
    pub license_public_key: Option<KeySource>,
    /// Expected `aud` claim, matched exactly.
    pub license_audience: String,
    /// Expected `iss` claim, matched exactly.
    pub license_issuer: String,
    /// Explicit override for "is a license required"; when unset the
    /// answer is derived from the runtime environment name.
    pub license_required: Option<bool>,
    /// The platform owner tenant, exempt from all billing.
    pub master_tenant_id: i64,
    /// Payment provider settings.
    pub provider: ProviderConfig,
    /// Days before the due date at which a dunning notice is sent, and
    /// the minimum gap between repeated notices for one invoice.
    pub notice_window_days: i32,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        let provider = ProviderConfig {
            base_url: std::env::var("PAYMENT_API_URL")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            access_token: std::env::var("PAYMENT_ACCESS_TOKEN").unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("PAYMENT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        };

        Ok(Self {
            license_private_key: KeySource::from_env(
                "LICENSE_PRIVATE_KEY",
                "LICENSE_PRIVATE_KEY_BASE64",
                "LICENSE_PRIVATE_KEY_PATH",
            ),
            license_public_key: KeySource::from_env(
                "LICENSE_PUBLIC_KEY",
                "LICENSE_PUBLIC_KEY_BASE64",
                "LICENSE_PUBLIC_KEY_PATH",
            ),
            license_audience: std::env::var("LICENSE_AUDIENCE")
                .unwrap_or_else(|_| "deskbill".to_string()),
            license_issuer: std::env::var("LICENSE_ISSUER")
                .unwrap_or_else(|_| "deskbill-licensing".to_string()),
            license_required: std::env::var("LICENSE_REQUIRED")
                .ok()
                .and_then(|v| v.parse().ok()),
            master_tenant_id: std::env::var("MASTER_TENANT_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            provider,
            notice_window_days: std::env::var("NOTICE_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        })
    }
}
