//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors surfaced by the billing crate.
///
/// `AlreadySettled` is intentionally absent: settling an invoice that is
/// already paid is the expected idempotent outcome and is reported as
/// success with `updated = false`.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Rejected input; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invoice {0} not found")]
    InvoiceNotFound(i64),

    #[error("tenant {0} not found")]
    TenantNotFound(i64),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    /// Paid invoices are immutable; value re-sync is rejected.
    #[error("invoice {0} is already paid")]
    InvoiceAlreadyPaid(i64),

    /// Tenant has no plan, or the plan value is not a positive amount.
    #[error("tenant has no plan with a positive value")]
    InvalidPlanValue,

    /// No license token or no public key is configured.
    #[error("no license configured")]
    LicenseMissing,

    /// Signature or claim validation failed. The detail is kept for
    /// diagnostics only and must not drive control flow.
    #[error("license invalid: {0}")]
    LicenseInvalid(String),

    /// Token issuance requested without a configured private key.
    #[error("license private key unavailable")]
    PrivateKeyUnavailable,

    /// Transient failure talking to the payment provider (network,
    /// timeout, non-2xx). Swallowed in webhook/background paths,
    /// surfaced on the synchronous polling path.
    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl BillingError {
    /// Whether the error is worth retrying at a higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Provider(_) | BillingError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BillingError::Provider("timeout".into()).is_transient());
        assert!(BillingError::Database("pool exhausted".into()).is_transient());
        assert!(!BillingError::Validation("bad discount".into()).is_transient());
        assert!(!BillingError::InvoiceAlreadyPaid(1).is_transient());
    }
}
