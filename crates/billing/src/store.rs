//! Invoice store access
//!
//! All persistence behind one async trait so the state-machine logic in
//! `invoices.rs` and `reconcile.rs` can be exercised against an
//! in-memory store in tests. The Postgres implementation keeps the SQL
//! inline next to the operation it serves.
//!
//! The single multi-row operation is [`BillingStore::settle_and_extend`]:
//! the paid-status claim and the tenant due-date extension commit
//! together or not at all, which is what makes webhook redelivery and
//! webhook/poll races safe.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::error::{BillingError, BillingResult};

/// Invoice lifecycle state. Two states only; settlement is the one
/// transition and it is irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Open,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
        }
    }

    fn from_db(s: &str) -> Self {
        if s == "paid" {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Open
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub id: i64,
    pub tenant_id: i64,
    pub detail: String,
    pub status: InvoiceStatus,
    pub value: Decimal,
    pub original_value: Option<Decimal>,
    pub discount_value: Option<Decimal>,
    pub due_date: Date,
    pub paid_at: Option<OffsetDateTime>,
    pub paid_method: Option<String>,
    pub paid_note: Option<String>,
    pub notice_sent_at: Option<OffsetDateTime>,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

/// Row shape for a new open invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub tenant_id: i64,
    pub detail: String,
    pub value: Decimal,
    pub due_date: Date,
}

/// Tenant fields the billing subsystem reads. Everything else about a
/// tenant lives outside this crate.
#[derive(Debug, Clone)]
pub struct TenantBilling {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub plan_id: Option<i64>,
    pub due_date: Option<Date>,
}

#[derive(Debug, Clone)]
pub struct PlanInfo {
    pub id: i64,
    pub name: String,
    pub value: Decimal,
    pub max_users: i32,
}

/// Partial update of an invoice's settlement fields. Never touches
/// `status` or `paid_at`; the paid transition goes through
/// `settle_and_extend` only.
#[derive(Debug, Clone, Default)]
pub struct SettlementUpdate {
    pub value: Option<Decimal>,
    /// Applied with COALESCE semantics: only written if the stored
    /// column is still NULL.
    pub original_value: Option<Decimal>,
    pub discount_value: Option<Decimal>,
    pub paid_method: Option<String>,
    pub paid_note: Option<String>,
}

impl SettlementUpdate {
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.original_value.is_none()
            && self.discount_value.is_none()
            && self.paid_method.is_none()
            && self.paid_note.is_none()
    }
}

/// Result of the atomic settlement claim.
#[derive(Debug, Clone, Copy)]
pub struct SettleOutcome {
    /// True only for the call that performed the open -> paid
    /// transition. Redeliveries get false.
    pub updated: bool,
    /// The tenant due date as stored after the call, whether or not
    /// this call moved it.
    pub due_date: Option<Date>,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn invoice(&self, invoice_id: i64) -> BillingResult<Option<Invoice>>;

    /// Invoices for a tenant with `from <= due_date < to`.
    async fn invoices_due_between(
        &self,
        tenant_id: i64,
        from: Date,
        to: Date,
    ) -> BillingResult<Vec<Invoice>>;

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice>;

    async fn delete_invoice(&self, invoice_id: i64) -> BillingResult<()>;

    /// Write settlement fields. `original_value` is write-once.
    async fn update_settlement(
        &self,
        invoice_id: i64,
        update: SettlementUpdate,
    ) -> BillingResult<Invoice>;

    /// Atomically claim the invoice as paid and, only on a fresh claim,
    /// push the tenant due date forward by 30 days anchored at
    /// `max(current due date, today)`.
    async fn settle_and_extend(
        &self,
        invoice_id: i64,
        tenant_id: i64,
        today: Date,
    ) -> BillingResult<SettleOutcome>;

    async fn record_notice_sent(
        &self,
        invoice_id: i64,
        at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Open invoices due within `window_days` of `today` (or past due)
    /// whose last notice, if any, is older than the same window.
    async fn open_invoices_needing_notice(
        &self,
        tenant_id: i64,
        today: Date,
        window_days: i32,
    ) -> BillingResult<Vec<Invoice>>;

    async fn tenant_billing(&self, tenant_id: i64) -> BillingResult<Option<TenantBilling>>;

    async fn tenant_by_api_key(&self, api_key: &str) -> BillingResult<Option<TenantBilling>>;

    async fn plan_info(&self, plan_id: i64) -> BillingResult<Option<PlanInfo>>;

    async fn save_license_token(&self, tenant_id: i64, token: &str) -> BillingResult<()>;

    async fn load_license_token(&self, tenant_id: i64) -> BillingResult<Option<String>>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type InvoiceRow = (
    i64,
    i64,
    String,
    String,
    Decimal,
    Option<Decimal>,
    Option<Decimal>,
    Date,
    Option<OffsetDateTime>,
    Option<String>,
    Option<String>,
    Option<OffsetDateTime>,
);

const INVOICE_COLUMNS: &str = "id, tenant_id, detail, status, value, original_value, \
     discount_value, due_date, paid_at, paid_method, paid_note, notice_sent_at";

fn invoice_from_row(row: InvoiceRow) -> Invoice {
    Invoice {
        id: row.0,
        tenant_id: row.1,
        detail: row.2,
        status: InvoiceStatus::from_db(&row.3),
        value: row.4,
        original_value: row.5,
        discount_value: row.6,
        due_date: row.7,
        paid_at: row.8,
        paid_method: row.9,
        paid_note: row.10,
        notice_sent_at: row.11,
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn invoice(&self, invoice_id: i64) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(invoice_from_row))
    }

    async fn invoices_due_between(
        &self,
        tenant_id: i64,
        from: Date,
        to: Date,
    ) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE tenant_id = $1 AND due_date >= $2 AND due_date < $3 \
             ORDER BY id"
        ))
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(invoice_from_row).collect())
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let row: InvoiceRow = sqlx::query_as(&format!(
            "INSERT INTO invoices (tenant_id, detail, status, value, due_date) \
             VALUES ($1, $2, 'open', $3, $4) \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice.tenant_id)
        .bind(&invoice.detail)
        .bind(invoice.value)
        .bind(invoice.due_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(invoice_from_row(row))
    }

    async fn delete_invoice(&self, invoice_id: i64) -> BillingResult<()> {
        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_settlement(
        &self,
        invoice_id: i64,
        update: SettlementUpdate,
    ) -> BillingResult<Invoice> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "UPDATE invoices SET \
                 value = COALESCE($2, value), \
                 original_value = COALESCE(original_value, $3), \
                 discount_value = COALESCE($4, discount_value), \
                 paid_method = COALESCE($5, paid_method), \
                 paid_note = COALESCE($6, paid_note), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(update.value)
        .bind(update.original_value)
        .bind(update.discount_value)
        .bind(update.paid_method.as_deref())
        .bind(update.paid_note.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        row.map(invoice_from_row)
            .ok_or(BillingError::InvoiceNotFound(invoice_id))
    }

    async fn settle_and_extend(
        &self,
        invoice_id: i64,
        tenant_id: i64,
        today: Date,
    ) -> BillingResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        // The claim: exactly one caller wins this conditional update.
        let claimed: Option<(i64,)> = sqlx::query_as(
            "UPDATE invoices SET status = 'paid', paid_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 AND status <> 'paid' \
             RETURNING id",
        )
        .bind(invoice_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_some() {
            let (due_date,): (Option<Date>,) = sqlx::query_as(
                "UPDATE tenants \
                 SET due_date = GREATEST(COALESCE(due_date, $2), $2) + 30, updated_at = NOW() \
                 WHERE id = $1 \
                 RETURNING due_date",
            )
            .bind(tenant_id)
            .bind(today)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(SettleOutcome {
                updated: true,
                due_date,
            });
        }
        drop(tx);

        // Nothing claimed: either the invoice is already paid (the
        // idempotent redelivery case) or it does not belong here.
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT status FROM invoices WHERE id = $1 AND tenant_id = $2")
                .bind(invoice_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_none() {
            return Err(BillingError::InvoiceNotFound(invoice_id));
        }

        let due: Option<(Option<Date>,)> =
            sqlx::query_as("SELECT due_date FROM tenants WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(SettleOutcome {
            updated: false,
            due_date: due.and_then(|(d,)| d),
        })
    }

    async fn record_notice_sent(
        &self,
        invoice_id: i64,
        at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE invoices SET notice_sent_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(invoice_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn open_invoices_needing_notice(
        &self,
        tenant_id: i64,
        today: Date,
        window_days: i32,
    ) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE tenant_id = $1 AND status = 'open' \
               AND due_date <= $2 + $3 \
               AND (notice_sent_at IS NULL OR notice_sent_at::date < $2 - $3) \
             ORDER BY due_date, id"
        ))
        .bind(tenant_id)
        .bind(today)
        .bind(window_days)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(invoice_from_row).collect())
    }

    async fn tenant_billing(&self, tenant_id: i64) -> BillingResult<Option<TenantBilling>> {
        let row: Option<(i64, String, Option<String>, Option<i64>, Option<Date>)> =
            sqlx::query_as(
                "SELECT id, name, email, plan_id, due_date FROM tenants WHERE id = $1",
            )
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name, email, plan_id, due_date)| TenantBilling {
            id,
            name,
            email,
            plan_id,
            due_date,
        }))
    }

    async fn tenant_by_api_key(&self, api_key: &str) -> BillingResult<Option<TenantBilling>> {
        let row: Option<(i64, String, Option<String>, Option<i64>, Option<Date>)> =
            sqlx::query_as(
                "SELECT id, name, email, plan_id, due_date FROM tenants WHERE api_key = $1",
            )
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name, email, plan_id, due_date)| TenantBilling {
            id,
            name,
            email,
            plan_id,
            due_date,
        }))
    }

    async fn plan_info(&self, plan_id: i64) -> BillingResult<Option<PlanInfo>> {
        let row: Option<(i64, String, Decimal, i32)> =
            sqlx::query_as("SELECT id, name, value, max_users FROM plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, value, max_users)| PlanInfo {
            id,
            name,
            value,
            max_users,
        }))
    }

    async fn save_license_token(&self, tenant_id: i64, token: &str) -> BillingResult<()> {
        sqlx::query(
            "INSERT INTO settings (tenant_id, name, value) VALUES ($1, 'license-token', $2) \
             ON CONFLICT (tenant_id, name) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(tenant_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_license_token(&self, tenant_id: i64) -> BillingResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM settings WHERE tenant_id = $1 AND name = 'license-token'",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }
}
