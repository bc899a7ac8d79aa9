//! Dunning notices
//!
//! Scans open invoices approaching or past their due date and sends at
//! most one notice per invoice per window. The scheduler is best-effort
//! across invoices: one failed send never stops the run.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::config::BillingConfig;
use crate::email::BillingMailer;
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

/// Outcome of one automatic dunning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DunningReport {
    pub sent: u32,
    pub failed: u32,
}

/// Outcome of a manual single-notice dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeOutcome {
    Sent,
    /// A notice for this invoice already went out within the window
    /// and `force` was not set.
    SkippedRecentNotice,
}

pub struct NotificationScheduler {
    store: Arc<dyn BillingStore>,
    mailer: Arc<dyn BillingMailer>,
    config: Arc<BillingConfig>,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        mailer: Arc<dyn BillingMailer>,
        config: Arc<BillingConfig>,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Notice every open invoice for the tenant that is due within the
    /// configured window (or past due) and has not been noticed within
    /// that same window.
    pub async fn run_automatic(&self, tenant_id: i64) -> DunningReport {
        self.run_automatic_at(OffsetDateTime::now_utc(), tenant_id)
            .await
    }

    pub(crate) async fn run_automatic_at(
        &self,
        now: OffsetDateTime,
        tenant_id: i64,
    ) -> DunningReport {
        let mut report = DunningReport::default();

        if tenant_id == self.config.master_tenant_id {
            return report;
        }
        if !self.mailer.is_enabled() {
            tracing::debug!(tenant_id, "dunning run skipped: mailer disabled");
            return report;
        }

        let tenant = match self.store.tenant_billing(tenant_id).await {
            Ok(Some(t)) => t,
            Ok(None) => return report,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "dunning: tenant lookup failed");
                report.failed += 1;
                return report;
            }
        };

        let due_soon = match self
            .store
            .open_invoices_needing_notice(tenant_id, now.date(), self.config.notice_window_days)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "dunning: invoice scan failed");
                report.failed += 1;
                return report;
            }
        };

        for invoice in due_soon {
            match self.mailer.send_billing_notice(&tenant, &invoice, None).await {
                Ok(()) => {
                    if let Err(e) = self.store.record_notice_sent(invoice.id, now).await {
                        tracing::warn!(invoice_id = invoice.id, error = %e, "notice sent but not recorded");
                    }
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(invoice_id = invoice.id, error = %e, "dunning notice failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Manual dispatch for one invoice. `force` bypasses both the paid
    /// check and the recent-notice gate.
    pub async fn send_one(
        &self,
        invoice_id: i64,
        override_recipient: Option<&str>,
        force: bool,
    ) -> BillingResult<NoticeOutcome> {
        self.send_one_at(OffsetDateTime::now_utc(), invoice_id, override_recipient, force)
            .await
    }

    pub(crate) async fn send_one_at(
        &self,
        now: OffsetDateTime,
        invoice_id: i64,
        override_recipient: Option<&str>,
        force: bool,
    ) -> BillingResult<NoticeOutcome> {
        let invoice = self
            .store
            .invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;

        if invoice.tenant_id == self.config.master_tenant_id {
            return Err(BillingError::Validation(
                "master tenant receives no billing notices".to_string(),
            ));
        }
        if invoice.is_paid() && !force {
            return Err(BillingError::InvoiceAlreadyPaid(invoice_id));
        }
        if !force {
            let window = Duration::days(i64::from(self.config.notice_window_days));
            if let Some(last) = invoice.notice_sent_at {
                if now - last < window {
                    return Ok(NoticeOutcome::SkippedRecentNotice);
                }
            }
        }

        let tenant = self
            .store
            .tenant_billing(invoice.tenant_id)
            .await?
            .ok_or(BillingError::TenantNotFound(invoice.tenant_id))?;

        self.mailer
            .send_billing_notice(&tenant, &invoice, override_recipient)
            .await?;
        self.store.record_notice_sent(invoice_id, now).await?;
        Ok(NoticeOutcome::Sent)
    }
}
