//! Route table

pub mod admin;
pub mod billing;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Provider-facing + tenant-facing billing surface
        .route("/billing/webhook", post(billing::webhook))
        .route("/billing/status/{payment_id}", get(billing::payment_status))
        .route("/billing/checkout/{invoice_id}", post(billing::create_checkout))
        // Administrative surface
        .route("/admin/invoices/{id}/settle", post(admin::settle_invoice))
        .route(
            "/admin/invoices/{id}/sync-plan-value",
            post(admin::sync_plan_value),
        )
        .route(
            "/admin/tenants/{id}/license",
            post(admin::issue_license).get(admin::get_license),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
