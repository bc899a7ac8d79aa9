//! Invoice lifecycle
//!
//! Recurring invoice generation, manual settlement, and the due-date /
//! license side effects of a paid transition. The rules live in pure
//! helpers at the bottom of the file; the service methods wire them to
//! the store.

use std::sync::Arc;

use rust_decimal::Decimal;
use time::{Date, Duration, Month, OffsetDateTime};

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::license::LicenseService;
use crate::store::{
    BillingStore, Invoice, NewInvoice, SettleOutcome, SettlementUpdate, TenantBilling,
};

/// Upper bound on how far ahead recurring invoices are generated.
const MAX_MONTHS_AHEAD: u32 = 36;

/// Days of license validity granted past the tenant due date, so a
/// tenant paying on the due date itself is never locked out overnight.
const LICENSE_GRACE_DAYS: i64 = 1;

/// Outcome of one best-effort side effect of a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectOutcome {
    Applied,
    /// Not attempted: nothing to do or the feature is unconfigured.
    Skipped,
    /// Attempted and failed; the settlement itself still succeeded.
    Degraded(String),
}

/// Secondary effects of a settlement, reported so callers and tests can
/// observe degradation instead of silently losing it.
#[derive(Debug, Clone)]
pub struct SideEffects {
    pub due_date: Option<Date>,
    pub license: SideEffectOutcome,
}

impl SideEffects {
    fn none() -> Self {
        Self {
            due_date: None,
            license: SideEffectOutcome::Skipped,
        }
    }
}

/// Manual settlement request, normally arriving from the admin API.
#[derive(Debug, Clone, Default)]
pub struct SettlementRequest {
    pub discount_value: Option<Decimal>,
    pub mark_paid: bool,
    pub paid_method: Option<String>,
    pub paid_note: Option<String>,
}

/// Report from one `ensure_upcoming` run.
#[derive(Debug, Clone, Default)]
pub struct EnsureReport {
    pub created: u32,
    pub collapsed: u32,
    /// Set when part of the run failed; generation is best-effort and
    /// the error never propagates.
    pub degraded: Option<String>,
}

pub struct InvoiceLifecycle {
    store: Arc<dyn BillingStore>,
    license: LicenseService,
    config: Arc<BillingConfig>,
}

impl InvoiceLifecycle {
    pub fn new(
        store: Arc<dyn BillingStore>,
        license: LicenseService,
        config: Arc<BillingConfig>,
    ) -> Self {
        Self {
            store,
            license,
            config,
        }
    }

    /// Guarantee one open-or-paid invoice per upcoming calendar month.
    ///
    /// Best-effort by contract: storage failures are logged and folded
    /// into the report, never returned.
    pub async fn ensure_upcoming(&self, tenant_id: i64, months_ahead: u32) -> EnsureReport {
        self.ensure_upcoming_at(OffsetDateTime::now_utc().date(), tenant_id, months_ahead)
            .await
    }

    pub(crate) async fn ensure_upcoming_at(
        &self,
        today: Date,
        tenant_id: i64,
        months_ahead: u32,
    ) -> EnsureReport {
        let mut report = EnsureReport::default();

        if tenant_id == self.config.master_tenant_id {
            return report;
        }

        let tenant = match self.store.tenant_billing(tenant_id).await {
            Ok(Some(t)) => t,
            Ok(None) => return report,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "invoice generation: tenant lookup failed");
                report.degraded = Some(e.to_string());
                return report;
            }
        };
        let Some(plan_id) = tenant.plan_id else {
            return report;
        };
        let plan = match self.store.plan_info(plan_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return report,
            Err(e) => {
                tracing::warn!(tenant_id, plan_id, error = %e, "invoice generation: plan lookup failed");
                report.degraded = Some(e.to_string());
                return report;
            }
        };
        if plan.value <= Decimal::ZERO {
            return report;
        }

        let detail = if plan.name.trim().is_empty() {
            format!("monthly fee - tenant {tenant_id}")
        } else {
            format!("monthly fee - {}", plan.name)
        };

        let months = months_ahead.clamp(1, MAX_MONTHS_AHEAD);
        for offset in 0..months {
            let due = target_due_date(today, offset);
            if let Err(e) = self
                .ensure_month(tenant_id, due, &detail, plan.value, &mut report)
                .await
            {
                tracing::warn!(
                    tenant_id,
                    month = %month_key(due),
                    error = %e,
                    "invoice generation: month skipped"
                );
                report.degraded = Some(e.to_string());
            }
        }
        report
    }

    async fn ensure_month(
        &self,
        tenant_id: i64,
        due: Date,
        detail: &str,
        value: Decimal,
        report: &mut EnsureReport,
    ) -> BillingResult<()> {
        let (from, to) = month_bounds(due);
        let existing = self.store.invoices_due_between(tenant_id, from, to).await?;

        if let Some(survivor) = pick_survivor(&existing) {
            let survivor_id = survivor.id;
            for dup in existing.iter().filter(|i| i.id != survivor_id) {
                self.store.delete_invoice(dup.id).await?;
                report.collapsed += 1;
                tracing::info!(
                    tenant_id,
                    invoice_id = dup.id,
                    kept = survivor_id,
                    "collapsed duplicate monthly invoice"
                );
            }
            return Ok(());
        }

        self.store
            .insert_invoice(NewInvoice {
                tenant_id,
                detail: detail.to_string(),
                value,
                due_date: due,
            })
            .await?;
        report.created += 1;
        Ok(())
    }

    /// Manual settlement: discount, payment metadata, and optionally the
    /// paid transition, in one call.
    pub async fn apply_settlement(
        &self,
        invoice_id: i64,
        request: SettlementRequest,
    ) -> BillingResult<(Invoice, SideEffects)> {
        self.apply_settlement_at(OffsetDateTime::now_utc(), invoice_id, request)
            .await
    }

    pub(crate) async fn apply_settlement_at(
        &self,
        now: OffsetDateTime,
        invoice_id: i64,
        request: SettlementRequest,
    ) -> BillingResult<(Invoice, SideEffects)> {
        let invoice = self
            .store
            .invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;

        if invoice.tenant_id == self.config.master_tenant_id {
            return Err(BillingError::Validation(
                "master tenant invoices cannot be settled".to_string(),
            ));
        }
        if let Some(discount) = request.discount_value {
            if discount < Decimal::ZERO {
                return Err(BillingError::Validation(
                    "discount must be zero or positive".to_string(),
                ));
            }
        }

        let mut update = SettlementUpdate {
            paid_method: request.paid_method.clone(),
            paid_note: request.paid_note.clone(),
            ..SettlementUpdate::default()
        };

        // Money fields freeze once paid; a discount on a paid invoice is
        // dropped, the metadata fields are still writable. The recorded
        // discount is the applied amount, capped at the invoice value.
        if let Some(discount) = request.discount_value {
            if invoice.is_paid() {
                tracing::info!(invoice_id, "discount ignored: invoice already paid");
            } else {
                update.original_value = Some(invoice.value);
                update.discount_value = Some(discount.min(invoice.value));
                update.value = Some(apply_discount(invoice.value, discount));
            }
        }

        let wants_transition = request.mark_paid && !invoice.is_paid();
        if update.is_empty() && !wants_transition {
            return Ok((invoice, SideEffects::none()));
        }

        let mut current = if update.is_empty() {
            invoice
        } else {
            self.store.update_settlement(invoice_id, update).await?
        };

        let mut effects = SideEffects::none();
        if wants_transition {
            let outcome = self
                .store
                .settle_and_extend(invoice_id, current.tenant_id, now.date())
                .await?;
            effects.due_date = outcome.due_date;
            if outcome.updated {
                effects.license = self
                    .renew_license(now, current.tenant_id, outcome.due_date)
                    .await;
            }
            current = self
                .store
                .invoice(invoice_id)
                .await?
                .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        }

        Ok((current, effects))
    }

    /// Settle from a confirmed provider payment. Redelivery is the
    /// normal case: `updated = false` means someone else already won.
    pub async fn confirm_payment(
        &self,
        invoice_id: i64,
        tenant_id: i64,
    ) -> BillingResult<(SettleOutcome, SideEffectOutcome)> {
        self.confirm_payment_at(OffsetDateTime::now_utc(), invoice_id, tenant_id)
            .await
    }

    pub(crate) async fn confirm_payment_at(
        &self,
        now: OffsetDateTime,
        invoice_id: i64,
        tenant_id: i64,
    ) -> BillingResult<(SettleOutcome, SideEffectOutcome)> {
        let outcome = self
            .store
            .settle_and_extend(invoice_id, tenant_id, now.date())
            .await?;
        let license = if outcome.updated {
            self.renew_license(now, tenant_id, outcome.due_date).await
        } else {
            SideEffectOutcome::Skipped
        };
        Ok((outcome, license))
    }

    /// Re-sync an open invoice's value to the tenant's current plan.
    pub async fn sync_to_plan_value(&self, invoice_id: i64) -> BillingResult<Invoice> {
        let invoice = self
            .store
            .invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        if invoice.is_paid() {
            return Err(BillingError::InvoiceAlreadyPaid(invoice_id));
        }

        let tenant = self
            .store
            .tenant_billing(invoice.tenant_id)
            .await?
            .ok_or(BillingError::TenantNotFound(invoice.tenant_id))?;
        let plan = match tenant.plan_id {
            Some(plan_id) => self.store.plan_info(plan_id).await?,
            None => None,
        };
        let plan = plan.ok_or(BillingError::InvalidPlanValue)?;
        if plan.value <= Decimal::ZERO {
            return Err(BillingError::InvalidPlanValue);
        }

        self.store
            .update_settlement(
                invoice_id,
                SettlementUpdate {
                    value: Some(plan.value),
                    ..SettlementUpdate::default()
                },
            )
            .await
    }

    /// Mint a fresh license expiring one day past the new due date and
    /// persist it as the tenant's stored token. Failures degrade the
    /// settlement's side effects, never the settlement. `now` is the
    /// settlement clock, so the token's `iat` matches the payment.
    async fn renew_license(
        &self,
        now: OffsetDateTime,
        tenant_id: i64,
        due_date: Option<Date>,
    ) -> SideEffectOutcome {
        let Some(due_date) = due_date else {
            return SideEffectOutcome::Skipped;
        };
        if self.config.license_private_key.is_none() {
            return SideEffectOutcome::Skipped;
        }
        match self.renew_license_inner(now, tenant_id, due_date).await {
            Ok(()) => SideEffectOutcome::Applied,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "license renewal failed after settlement");
                SideEffectOutcome::Degraded(e.to_string())
            }
        }
    }

    async fn renew_license_inner(
        &self,
        now: OffsetDateTime,
        tenant_id: i64,
        due_date: Date,
    ) -> BillingResult<()> {
        let tenant = self
            .store
            .tenant_billing(tenant_id)
            .await?
            .ok_or(BillingError::TenantNotFound(tenant_id))?;
        let token = self.issue_license_for_at(now, &tenant, due_date).await?;
        self.store.save_license_token(tenant_id, &token).await
    }

    /// Issue a license whose expiry is anchored to the given due date.
    pub async fn issue_license_for(
        &self,
        tenant: &TenantBilling,
        due_date: Date,
    ) -> BillingResult<String> {
        self.issue_license_for_at(OffsetDateTime::now_utc(), tenant, due_date)
            .await
    }

    pub(crate) async fn issue_license_for_at(
        &self,
        now: OffsetDateTime,
        tenant: &TenantBilling,
        due_date: Date,
    ) -> BillingResult<String> {
        let expiry = license_expiry(due_date);
        let ttl_secs = (expiry - now).whole_seconds();

        // Plan details enrich the claims; a tenant without a plan still
        // gets a token.
        let plan = match tenant.plan_id {
            Some(plan_id) => self.store.plan_info(plan_id).await?,
            None => None,
        };
        let (plan_name, max_users) = plan
            .map(|p| (p.name, p.max_users.max(1) as u32))
            .unwrap_or_else(|| ("unknown".to_string(), 1));

        self.license.issue_at(
            now,
            tenant.id,
            &tenant.name,
            &plan_name,
            max_users,
            ttl_secs,
            serde_json::Map::new(),
        )
    }
}

/// Midnight UTC one day past the due date.
pub(crate) fn license_expiry(due_date: Date) -> OffsetDateTime {
    (due_date + Duration::days(LICENSE_GRACE_DAYS)).midnight().assume_utc()
}

/// The +30 rule: anchor at whichever of the current due date and today
/// is later, then add 30 days. A past-due tenant restarts from today; a
/// tenant paying early keeps the unused remainder.
pub fn extend_due_date(current: Option<Date>, today: Date) -> Date {
    current.map_or(today, |d| d.max(today)) + Duration::days(30)
}

/// Subtract a discount, flooring at zero. Never negative.
pub fn apply_discount(current: Decimal, discount: Decimal) -> Decimal {
    (current - discount).max(Decimal::ZERO)
}

/// `YYYY-MM` grouping key for log lines.
pub(crate) fn month_key(d: Date) -> String {
    format!("{:04}-{:02}", d.year(), u8::from(d.month()))
}

/// First day of the date's month and first day of the next month.
pub(crate) fn month_bounds(d: Date) -> (Date, Date) {
    let first = d.replace_day(1).unwrap_or(d);
    let next = match d.month() {
        Month::December => first
            .replace_year(d.year() + 1)
            .and_then(|x| x.replace_month(Month::January))
            .unwrap_or(first),
        m => first.replace_month(m.next()).unwrap_or(first),
    };
    (first, next)
}

/// Same day-of-month `offset_months` ahead, clamped to the target
/// month's length (Jan 31 -> Feb 28/29).
pub fn target_due_date(today: Date, offset_months: u32) -> Date {
    let zero_based = (i32::from(u8::from(today.month())) - 1) + offset_months as i32;
    let year = today.year() + zero_based / 12;
    let month_number = (zero_based % 12) as u8 + 1;
    let month = Month::try_from(month_number).unwrap_or(today.month());
    let day = today.day().min(time::util::days_in_year_month(year, month));
    Date::from_calendar_date(year, month, day).unwrap_or(today)
}

/// Among duplicate invoices of one month, the one to keep: a paid
/// invoice beats any open one, ties broken by highest id.
pub fn pick_survivor(invoices: &[Invoice]) -> Option<&Invoice> {
    invoices.iter().max_by_key(|i| (i.is_paid(), i.id))
}
