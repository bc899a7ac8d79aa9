//! Deskbill Background Worker
//!
//! Scheduled billing jobs:
//! - Recurring invoice generation for every billable tenant (hourly)
//! - Dunning notices for due and past-due invoices (daily)
//! - Heartbeat log line (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use deskbill_billing::BillingService;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<PgPool> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

fn env_or(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Every tenant that can be billed: has a plan and is not the master
/// tenant.
async fn billable_tenant_ids(pool: &PgPool, master_tenant_id: i64) -> sqlx::Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM tenants WHERE plan_id IS NOT NULL AND id <> $1 ORDER BY id")
            .bind(master_tenant_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn generation_cycle(pool: &PgPool, billing: &BillingService, months_ahead: u32) {
    let tenants = match billable_tenant_ids(pool, billing.config.master_tenant_id).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "invoice generation cycle: tenant scan failed");
            return;
        }
    };

    let mut created = 0;
    let mut collapsed = 0;
    let mut degraded = 0;
    for tenant_id in &tenants {
        let report = billing.invoices.ensure_upcoming(*tenant_id, months_ahead).await;
        created += report.created;
        collapsed += report.collapsed;
        if report.degraded.is_some() {
            degraded += 1;
        }
    }
    info!(
        tenants = tenants.len(),
        created, collapsed, degraded, "Invoice generation cycle complete"
    );
}

async fn dunning_cycle(pool: &PgPool, billing: &BillingService) {
    let tenants = match billable_tenant_ids(pool, billing.config.master_tenant_id).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "dunning cycle: tenant scan failed");
            return;
        }
    };

    let mut sent = 0;
    let mut failed = 0;
    for tenant_id in &tenants {
        let report = billing.dunning.run_automatic(*tenant_id).await;
        sent += report.sent;
        failed += report.failed;
    }
    info!(tenants = tenants.len(), sent, failed, "Dunning cycle complete");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Deskbill Worker");

    let pool = create_db_pool().await?;
    let billing = Arc::new(BillingService::from_env(pool.clone())?);

    let months_ahead = env_or("INVOICE_MONTHS_AHEAD", 3);
    let dunning_hour = env_or("DUNNING_HOUR_UTC", 8).min(23);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Recurring invoice generation, top of every hour.
    let gen_pool = pool.clone();
    let gen_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let pool = gen_pool.clone();
            let billing = gen_billing.clone();
            Box::pin(async move {
                info!("Running scheduled invoice generation");
                generation_cycle(&pool, &billing, months_ahead).await;
            })
        })?)
        .await?;
    info!("Scheduled: Invoice generation (hourly)");

    // Job 2: Dunning notices, once a day.
    let dun_pool = pool.clone();
    let dun_billing = billing.clone();
    scheduler
        .add(Job::new_async(
            format!("0 0 {dunning_hour} * * *").as_str(),
            move |_uuid, _l| {
                let pool = dun_pool.clone();
                let billing = dun_billing.clone();
                Box::pin(async move {
                    info!("Running scheduled dunning notices");
                    dunning_cycle(&pool, &billing).await;
                })
            },
        )?)
        .await?;
    info!("Scheduled: Dunning notices (daily at {dunning_hour}:00 UTC)");

    // Job 3: Heartbeat so a silent worker is distinguishable from a dead one.
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!("Worker scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker");
    Ok(())
}
