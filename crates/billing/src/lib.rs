// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Deskbill Billing Module
//!
//! Recurring tenant billing: monthly invoice generation, payment
//! reconciliation against the provider, due-date extension, RS256
//! license tokens, and dunning notices.
//!
//! ## Features
//!
//! - **Invoice Generation**: One invoice per tenant per calendar month,
//!   duplicates collapsed deterministically
//! - **Reconciliation**: Provider webhooks plus a polling fallback, both
//!   idempotent through one atomic settle-and-extend operation
//! - **Due Dates**: +30-day extension anchored at max(due date, today),
//!   at most once per invoice
//! - **Licenses**: RS256 tokens renewed on settlement, expiry anchored
//!   to the tenant due date
//! - **Dunning**: Windowed payment notices, at most one per invoice per
//!   window

pub mod config;
pub mod dunning;
pub mod email;
pub mod error;
pub mod events;
pub mod invoices;
pub mod license;
pub mod provider;
pub mod reconcile;
pub mod store;


// Config
pub use config::{BillingConfig, KeySource, ProviderConfig};

// Dunning
pub use dunning::{DunningReport, NoticeOutcome, NotificationScheduler};

// Email
pub use email::{BillingMailer, HttpMailer};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{LogNotifier, Notifier, PaymentSettled};

// Invoices
pub use invoices::{
    apply_discount, extend_due_date, pick_survivor, target_due_date, EnsureReport,
    InvoiceLifecycle, SettlementRequest, SideEffectOutcome, SideEffects,
};

// License
pub use license::{LicenseClaims, LicenseData, LicenseService};

// Provider
pub use provider::{
    CheckoutPreference, CheckoutRequest, HttpPaymentProvider, PaymentDetails, PaymentMetadata,
    PaymentProvider, PaymentStatus,
};

// Reconcile
pub use reconcile::{PollResult, ReconciliationService, WebhookEvent};

// Store
pub use store::{
    BillingStore, Invoice, InvoiceStatus, NewInvoice, PgBillingStore, PlanInfo, SettleOutcome,
    SettlementUpdate, TenantBilling,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub config: Arc<BillingConfig>,
    pub store: Arc<dyn BillingStore>,
    pub license: LicenseService,
    pub invoices: Arc<InvoiceLifecycle>,
    pub reconciliation: ReconciliationService,
    pub dunning: NotificationScheduler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let provider = Arc::new(HttpPaymentProvider::new(config.provider.clone())?);
        let mailer = Arc::new(HttpMailer::from_env()?);
        Ok(Self::with_parts(
            config,
            Arc::new(PgBillingStore::new(pool)),
            provider,
            mailer,
            Arc::new(LogNotifier),
        ))
    }

    /// Create a new billing service with explicit collaborators.
    pub fn with_parts(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn PaymentProvider>,
        mailer: Arc<dyn BillingMailer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let config = Arc::new(config);
        let license = LicenseService::new(config.clone());
        let invoices = Arc::new(InvoiceLifecycle::new(
            store.clone(),
            license.clone(),
            config.clone(),
        ));
        let reconciliation =
            ReconciliationService::new(store.clone(), invoices.clone(), provider, notifier);
        let dunning = NotificationScheduler::new(store.clone(), mailer, config.clone());

        Self {
            config,
            store,
            license,
            invoices,
            reconciliation,
            dunning,
        }
    }
}
