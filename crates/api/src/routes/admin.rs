//! Administrative billing routes
//!
//! All routes here require the shared admin token.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use deskbill_billing::{
    BillingError, Invoice, SettlementRequest, SideEffectOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::require_admin;
use crate::error::ApiError;
use crate::state::AppState;

/// Invoice as it leaves the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub id: i64,
    pub tenant_id: i64,
    pub detail: String,
    pub status: String,
    pub value: Decimal,
    pub original_value: Option<Decimal>,
    pub discount_value: Option<Decimal>,
    pub due_date: String,
    pub paid_at: Option<String>,
    pub paid_method: Option<String>,
    pub paid_note: Option<String>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(i: Invoice) -> Self {
        Self {
            id: i.id,
            tenant_id: i.tenant_id,
            detail: i.detail,
            status: i.status.as_str().to_string(),
            value: i.value,
            original_value: i.original_value,
            discount_value: i.discount_value,
            due_date: i.due_date.to_string(),
            paid_at: i.paid_at.map(|t| t.to_string()),
            paid_method: i.paid_method,
            paid_note: i.paid_note,
        }
    }
}

fn side_effect_json(outcome: &SideEffectOutcome) -> Value {
    match outcome {
        SideEffectOutcome::Applied => json!({ "outcome": "applied" }),
        SideEffectOutcome::Skipped => json!({ "outcome": "skipped" }),
        SideEffectOutcome::Degraded(reason) => {
            json!({ "outcome": "degraded", "reason": reason })
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleBody {
    pub discount_value: Option<Decimal>,
    #[serde(default)]
    pub mark_paid: bool,
    pub paid_method: Option<String>,
    pub paid_note: Option<String>,
}

/// POST /admin/invoices/{id}/settle
pub async fn settle_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<SettleBody>>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&headers, &state)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let (invoice, effects) = state
        .billing
        .invoices
        .apply_settlement(
            invoice_id,
            SettlementRequest {
                discount_value: body.discount_value,
                mark_paid: body.mark_paid,
                paid_method: body.paid_method,
                paid_note: body.paid_note,
            },
        )
        .await?;

    Ok(Json(json!({
        "ok": true,
        "invoice": InvoiceResponse::from(invoice),
        "dueDate": effects.due_date.map(|d| d.to_string()),
        "licenseRenewal": side_effect_json(&effects.license),
    })))
}

/// POST /admin/invoices/{id}/sync-plan-value
pub async fn sync_plan_value(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&headers, &state)?;
    let invoice = state.billing.invoices.sync_to_plan_value(invoice_id).await?;
    Ok(Json(json!({
        "ok": true,
        "invoice": InvoiceResponse::from(invoice),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLicenseBody {
    /// Explicit validity in seconds; when absent the expiry anchors to
    /// the tenant's due date.
    pub ttl_secs: Option<i64>,
}

/// POST /admin/tenants/{id}/license
pub async fn issue_license(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<IssueLicenseBody>>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&headers, &state)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let tenant = state
        .billing
        .store
        .tenant_billing(tenant_id)
        .await
        .map_err(ApiError::Billing)?
        .ok_or(ApiError::Billing(BillingError::TenantNotFound(tenant_id)))?;

    let token = match body.ttl_secs {
        Some(ttl_secs) => {
            let plan = match tenant.plan_id {
                Some(plan_id) => state.billing.store.plan_info(plan_id).await?,
                None => None,
            };
            let (plan_name, max_users) = plan
                .map(|p| (p.name, p.max_users.max(1) as u32))
                .unwrap_or_else(|| ("unknown".to_string(), 1));
            state.billing.license.issue(
                tenant.id,
                &tenant.name,
                &plan_name,
                max_users,
                ttl_secs,
                serde_json::Map::new(),
            )?
        }
        None => {
            let due_date = tenant.due_date.ok_or_else(|| {
                ApiError::Billing(BillingError::Validation(
                    "tenant has no due date to anchor the license to".to_string(),
                ))
            })?;
            state
                .billing
                .invoices
                .issue_license_for(&tenant, due_date)
                .await?
        }
    };

    state
        .billing
        .store
        .save_license_token(tenant_id, &token)
        .await?;

    Ok(Json(json!({ "ok": true, "token": token })))
}

/// GET /admin/tenants/{id}/license
///
/// Verifies the stored token and returns its claims. A missing token
/// and an invalid token are distinct failures.
pub async fn get_license(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&headers, &state)?;

    let token = state
        .billing
        .store
        .load_license_token(tenant_id)
        .await?
        .ok_or(ApiError::Billing(BillingError::LicenseMissing))?;
    let claims = state.billing.license.verify(&token)?;

    Ok(Json(json!({
        "ok": true,
        "claims": claims,
        "token": token,
    })))
}
