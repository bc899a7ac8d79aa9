//! Payment reconciliation
//!
//! Two delivery paths converge here: provider webhooks (at-least-once,
//! unauthenticated beyond the provider lookup) and tenant-initiated
//! polling. Both funnel into the store's atomic settle-and-extend, so
//! redelivery and races cost nothing beyond a no-op update.
//!
//! Webhook handling never fails outward: the provider retries on
//! non-2xx and a poison event would retry forever. Polling is the
//! synchronous path and does surface transient errors.

use std::sync::Arc;

use time::Date;

use crate::error::{BillingError, BillingResult};
use crate::events::{Notifier, PaymentSettled};
use crate::invoices::InvoiceLifecycle;
use crate::provider::{CheckoutPreference, CheckoutRequest, PaymentProvider, PaymentStatus};
use crate::store::{BillingStore, SettleOutcome};

/// Normalized webhook notification; the API layer merges query
/// parameters and body fields into this before handing it over.
#[derive(Debug, Clone, Default)]
pub struct WebhookEvent {
    pub event_type: Option<String>,
    pub payment_id: Option<String>,
}

/// Result of one polling round-trip.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub status: PaymentStatus,
    pub invoice_id: Option<i64>,
    pub updated: bool,
    pub due_date: Option<Date>,
}

pub struct ReconciliationService {
    store: Arc<dyn BillingStore>,
    lifecycle: Arc<InvoiceLifecycle>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        lifecycle: Arc<InvoiceLifecycle>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            provider,
            notifier,
        }
    }

    /// Process one webhook notification. Infallible by contract; every
    /// branch ends in an ack.
    pub async fn handle_webhook(&self, event: WebhookEvent) {
        if event.event_type.as_deref() != Some("payment") {
            tracing::debug!(event_type = ?event.event_type, "webhook ignored: not a payment event");
            return;
        }
        let Some(payment_id) = event.payment_id else {
            tracing::debug!("webhook ignored: no payment id");
            return;
        };

        let payment = match self.provider.fetch_payment(&payment_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(payment_id, error = %e, "webhook: payment lookup failed");
                return;
            }
        };
        let Some(meta) = payment.metadata else {
            tracing::warn!(payment_id, "webhook: payment carries no billing metadata");
            return;
        };
        if payment.status != PaymentStatus::Approved {
            tracing::info!(
                payment_id,
                status = payment.status.as_str(),
                invoice_id = meta.invoice_id,
                "webhook: payment not approved, nothing to settle"
            );
            return;
        }

        match self
            .settle_payment(meta.invoice_id, meta.tenant_id, Some(payment_id.clone()))
            .await
        {
            Ok(outcome) if outcome.updated => {
                tracing::info!(
                    payment_id,
                    invoice_id = meta.invoice_id,
                    tenant_id = meta.tenant_id,
                    due_date = ?outcome.due_date,
                    "webhook: invoice settled"
                );
            }
            Ok(_) => {
                tracing::info!(
                    payment_id,
                    invoice_id = meta.invoice_id,
                    "webhook: invoice already settled, redelivery acked"
                );
            }
            Err(e) => {
                tracing::warn!(payment_id, invoice_id = meta.invoice_id, error = %e, "webhook: settlement failed");
            }
        }
    }

    /// Settle a confirmed payment. The event publication is best-effort
    /// and fires only on a fresh settlement.
    pub async fn settle_payment(
        &self,
        invoice_id: i64,
        tenant_id: i64,
        payment_id: Option<String>,
    ) -> BillingResult<SettleOutcome> {
        let (outcome, license) = self.lifecycle.confirm_payment(invoice_id, tenant_id).await?;
        if outcome.updated {
            tracing::debug!(invoice_id, license = ?license, "settlement side effects");
            self.notifier
                .publish(PaymentSettled {
                    tenant_id,
                    invoice_id,
                    due_date: outcome.due_date,
                    payment_id,
                })
                .await;
        }
        Ok(outcome)
    }

    /// Tenant-initiated status check, the fallback for lost webhooks.
    /// Settles on the spot when the payment turns out approved.
    pub async fn poll_payment(
        &self,
        tenant_id: i64,
        payment_id: &str,
    ) -> BillingResult<PollResult> {
        let payment = self.provider.fetch_payment(payment_id).await?;

        let Some(meta) = payment.metadata else {
            return Ok(PollResult {
                status: payment.status,
                invoice_id: None,
                updated: false,
                due_date: None,
            });
        };
        if meta.tenant_id != tenant_id {
            return Err(BillingError::Validation(
                "payment does not belong to this tenant".to_string(),
            ));
        }

        if payment.status == PaymentStatus::Approved {
            let outcome = self
                .settle_payment(meta.invoice_id, tenant_id, Some(payment_id.to_string()))
                .await?;
            return Ok(PollResult {
                status: PaymentStatus::Approved,
                invoice_id: Some(meta.invoice_id),
                updated: outcome.updated,
                due_date: outcome.due_date,
            });
        }

        Ok(PollResult {
            status: payment.status,
            invoice_id: Some(meta.invoice_id),
            updated: false,
            due_date: None,
        })
    }

    /// Create a hosted checkout for one of the tenant's open invoices.
    pub async fn create_checkout_preference(
        &self,
        tenant_id: i64,
        invoice_id: i64,
    ) -> BillingResult<CheckoutPreference> {
        let invoice = self
            .store
            .invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        if invoice.tenant_id != tenant_id {
            return Err(BillingError::InvoiceNotFound(invoice_id));
        }
        if invoice.is_paid() {
            return Err(BillingError::InvoiceAlreadyPaid(invoice_id));
        }

        self.provider
            .create_preference(CheckoutRequest {
                invoice_id,
                tenant_id,
                title: invoice.detail.clone(),
                amount: invoice.value,
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod mock_provider {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::provider::PaymentDetails;

    /// Scripted provider: returns a fixed payment or a transient error.
    pub struct MockProvider {
        payment: Mutex<Option<PaymentDetails>>,
        pub fail_lookup: bool,
    }

    impl MockProvider {
        pub fn returning(payment: PaymentDetails) -> Self {
            Self {
                payment: Mutex::new(Some(payment)),
                fail_lookup: false,
            }
        }

        pub fn unreachable_api() -> Self {
            Self {
                payment: Mutex::new(None),
                fail_lookup: true,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentDetails> {
            if self.fail_lookup {
                return Err(BillingError::Provider("connection timed out".to_string()));
            }
            let guard = match self.payment.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .clone()
                .ok_or_else(|| BillingError::Provider(format!("payment {payment_id} unknown")))
        }

        async fn create_preference(
            &self,
            request: CheckoutRequest,
        ) -> BillingResult<CheckoutPreference> {
            if self.fail_lookup {
                return Err(BillingError::Provider("connection timed out".to_string()));
            }
            Ok(CheckoutPreference {
                id: format!("pref-{}", request.invoice_id),
                checkout_url: format!("https://checkout.test/{}", request.invoice_id),
            })
        }
    }
}
