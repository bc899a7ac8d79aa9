//! Billing notice delivery
//!
//! Mail transport stays behind the `BillingMailer` trait; the HTTP
//! implementation posts to a relay API and disables itself silently
//! when the relay is not configured, so development environments run
//! the full dunning path without sending anything.

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::store::{Invoice, TenantBilling};

#[async_trait]
pub trait BillingMailer: Send + Sync {
    /// Send one payment notice for an open invoice. `recipient`
    /// overrides the tenant's stored email when present.
    async fn send_billing_notice(
        &self,
        tenant: &TenantBilling,
        invoice: &Invoice,
        recipient: Option<&str>,
    ) -> BillingResult<()>;

    /// False when the transport is unconfigured; callers skip sends
    /// without treating it as a failure.
    fn is_enabled(&self) -> bool;
}

/// HTTP relay mailer, configured entirely from the environment.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn from_env() -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Internal(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            api_url: std::env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: std::env::var("MAIL_API_KEY").unwrap_or_default(),
            from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "billing@deskbill.io".to_string()),
        })
    }
}

#[async_trait]
impl BillingMailer for HttpMailer {
    async fn send_billing_notice(
        &self,
        tenant: &TenantBilling,
        invoice: &Invoice,
        recipient: Option<&str>,
    ) -> BillingResult<()> {
        let Some(api_url) = &self.api_url else {
            tracing::debug!(tenant_id = tenant.id, "mail relay unconfigured, notice skipped");
            return Ok(());
        };
        let Some(to) = recipient.or(tenant.email.as_deref()) else {
            tracing::warn!(tenant_id = tenant.id, "tenant has no email, notice skipped");
            return Ok(());
        };

        let payload = serde_json::json!({
            "from": self.from,
            "to": to,
            "subject": format!("Payment notice: invoice #{}", invoice.id),
            "body": format!(
                "Invoice #{} ({}) for {} is due on {}. Amount: {}.",
                invoice.id, invoice.detail, tenant.name, invoice.due_date, invoice.value
            ),
        });

        let response = self
            .client
            .post(api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BillingError::Provider(format!("mail relay: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::Provider(format!(
                "mail relay returned {status}"
            )));
        }
        tracing::info!(tenant_id = tenant.id, invoice_id = invoice.id, to, "billing notice sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.api_url.is_some()
    }
}
