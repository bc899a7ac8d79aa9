//! Tenant- and provider-facing billing routes

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use deskbill_billing::WebhookEvent;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::require_tenant;
use crate::error::ApiError;
use crate::state::AppState;

/// The provider sends notification parameters in the query string
/// (`?type=payment&data.id=123`), sometimes duplicated in the body.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(rename = "data.id")]
    data_id: Option<String>,
    /// Older notification format.
    topic: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    #[serde(rename = "type")]
    event_type: Option<String>,
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    id: Option<Value>,
}

fn merge_webhook_input(query: WebhookQuery, body: Option<WebhookBody>) -> WebhookEvent {
    let body = body.unwrap_or_default();
    let event_type = query
        .event_type
        .or(query.topic)
        .or(body.event_type);
    let payment_id = query
        .data_id
        .or(query.id)
        .or_else(|| {
            body.data.and_then(|d| d.id).map(|id| match id {
                Value::String(s) => s,
                other => other.to_string(),
            })
        })
        .filter(|id| !id.is_empty());
    WebhookEvent {
        event_type,
        payment_id,
    }
}

/// The body arrives as raw bytes: an empty or malformed body must not
/// reject the notification, it just contributes nothing.
fn parse_webhook_body(body: &[u8]) -> Option<WebhookBody> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(error = %e, "webhook body is not valid JSON, ignored");
            None
        }
    }
}

/// POST /billing/webhook
///
/// Always 200: the provider retries on anything else, and a poison
/// notification would retry forever. Processing happens off the
/// request path.
pub async fn webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Json<Value> {
    let event = merge_webhook_input(query, parse_webhook_body(&body));
    tracing::debug!(?event, "webhook received");

    let billing = state.billing.clone();
    tokio::spawn(async move {
        billing.reconciliation.handle_webhook(event).await;
    });

    Json(json!({ "ok": true }))
}

/// GET /billing/status/{payment_id}
///
/// Polling fallback for lost webhooks; settles on the spot when the
/// payment turns out approved.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = require_tenant(&headers, &state).await?;
    let poll = state
        .billing
        .reconciliation
        .poll_payment(tenant.id, &payment_id)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "status": poll.status.as_str(),
        "invoiceId": poll.invoice_id,
        "updated": poll.updated,
        "dueDate": poll.due_date.map(|d| d.to_string()),
    })))
}

/// POST /billing/checkout/{invoice_id}
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = require_tenant(&headers, &state).await?;
    let preference = state
        .billing
        .reconciliation
        .create_checkout_preference(tenant.id, invoice_id)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "preferenceId": preference.id,
        "checkoutUrl": preference.checkout_url,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parameters_win_over_body() {
        let query = WebhookQuery {
            event_type: Some("payment".to_string()),
            data_id: Some("111".to_string()),
            ..WebhookQuery::default()
        };
        let body = WebhookBody {
            event_type: Some("merchant_order".to_string()),
            data: Some(WebhookData {
                id: Some(Value::String("222".to_string())),
            }),
        };
        let event = merge_webhook_input(query, Some(body));
        assert_eq!(event.event_type.as_deref(), Some("payment"));
        assert_eq!(event.payment_id.as_deref(), Some("111"));
    }

    #[test]
    fn body_fills_in_missing_query_fields() {
        let body = WebhookBody {
            event_type: Some("payment".to_string()),
            data: Some(WebhookData {
                id: Some(Value::Number(12345.into())),
            }),
        };
        let event = merge_webhook_input(WebhookQuery::default(), Some(body));
        assert_eq!(event.event_type.as_deref(), Some("payment"));
        assert_eq!(event.payment_id.as_deref(), Some("12345"));
    }

    #[test]
    fn legacy_topic_format_is_understood() {
        let query = WebhookQuery {
            topic: Some("payment".to_string()),
            id: Some("999".to_string()),
            ..WebhookQuery::default()
        };
        let event = merge_webhook_input(query, None);
        assert_eq!(event.event_type.as_deref(), Some("payment"));
        assert_eq!(event.payment_id.as_deref(), Some("999"));
    }

    #[test]
    fn empty_input_yields_empty_event() {
        let event = merge_webhook_input(WebhookQuery::default(), None);
        assert!(event.event_type.is_none());
        assert!(event.payment_id.is_none());
    }

    #[test]
    fn malformed_body_is_ignored_not_rejected() {
        assert!(parse_webhook_body(b"").is_none());
        assert!(parse_webhook_body(b"{not json").is_none());
        assert!(parse_webhook_body(b"\"just a string\"").is_none());

        // Query parameters still produce a full event on their own.
        let query = WebhookQuery {
            event_type: Some("payment".to_string()),
            data_id: Some("123".to_string()),
            ..WebhookQuery::default()
        };
        let event = merge_webhook_input(query, parse_webhook_body(b"{not json"));
        assert_eq!(event.event_type.as_deref(), Some("payment"));
        assert_eq!(event.payment_id.as_deref(), Some("123"));
    }
}
