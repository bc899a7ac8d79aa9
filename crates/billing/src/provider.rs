//! Payment provider client
//!
//! Thin trait over the provider's REST API: fetch a payment by id,
//! create a checkout preference. Transport failures and timeouts map to
//! the transient `Provider` error and never to a negative payment
//! result; only the provider's own status field decides that.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{BillingError, BillingResult};

/// Provider payment status, normalized. Anything unrecognized is kept
/// verbatim in `Other` so logs show what the provider actually said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Approved,
    Pending,
    Rejected,
    Cancelled,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "approved" => PaymentStatus::Approved,
            "pending" | "in_process" | "authorized" => PaymentStatus::Pending,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" | "refunded" | "charged_back" => PaymentStatus::Cancelled,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Other(s) => s,
        }
    }
}

/// Metadata we attach at checkout time and read back on confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(rename = "invoice_id", alias = "invoiceId")]
    pub invoice_id: i64,
    #[serde(rename = "tenant_id", alias = "tenantId")]
    pub tenant_id: i64,
}

#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub id: String,
    pub status: PaymentStatus,
    pub metadata: Option<PaymentMetadata>,
}

/// Request to create a hosted checkout for one invoice.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub invoice_id: i64,
    pub tenant_id: i64,
    pub title: String,
    pub amount: Decimal,
}

/// The provider's hosted checkout handle.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutPreference {
    pub id: String,
    #[serde(rename = "init_point")]
    pub checkout_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentDetails>;

    async fn create_preference(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutPreference>;
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    metadata: Option<PaymentMetadata>,
}

/// reqwest-backed provider client with a hard per-call timeout.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpPaymentProvider {
    pub fn new(config: ProviderConfig) -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Internal(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentDetails> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{payment_id}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| BillingError::Provider(format!("payment lookup: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::Provider(format!(
                "payment lookup returned {status}"
            )));
        }

        let body: PaymentResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("payment lookup body: {e}")))?;

        // The provider sends numeric ids on webhooks and string ids on
        // lookups; normalize to a string.
        let id = match body.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(PaymentDetails {
            id,
            status: PaymentStatus::parse(&body.status),
            metadata: body.metadata,
        })
    }

    async fn create_preference(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutPreference> {
        let payload = serde_json::json!({
            "items": [{
                "title": request.title,
                "quantity": 1,
                "unit_price": request.amount,
            }],
            "metadata": {
                "invoice_id": request.invoice_id,
                "tenant_id": request.tenant_id,
            },
            "external_reference": request.invoice_id.to_string(),
        });

        let response = self
            .client
            .post(self.url("/checkout/preferences"))
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BillingError::Provider(format!("preference create: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::Provider(format!(
                "preference create returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("preference body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization() {
        assert_eq!(PaymentStatus::parse("approved"), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::parse("in_process"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::parse("charged_back"), PaymentStatus::Cancelled);
        assert_eq!(
            PaymentStatus::parse("weird"),
            PaymentStatus::Other("weird".to_string())
        );
        assert_eq!(PaymentStatus::Other("weird".to_string()).as_str(), "weird");
    }

    #[test]
    fn metadata_accepts_both_casings() {
        let snake: PaymentMetadata =
            serde_json::from_value(serde_json::json!({"invoice_id": 9, "tenant_id": 2}))
                .unwrap_or(PaymentMetadata {
                    invoice_id: 0,
                    tenant_id: 0,
                });
        assert_eq!((snake.invoice_id, snake.tenant_id), (9, 2));

        let camel: PaymentMetadata =
            serde_json::from_value(serde_json::json!({"invoiceId": 9, "tenantId": 2}))
                .unwrap_or(PaymentMetadata {
                    invoice_id: 0,
                    tenant_id: 0,
                });
        assert_eq!((camel.invoice_id, camel.tenant_id), (9, 2));
    }
}
