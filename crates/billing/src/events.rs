//! Settlement events
//!
//! A settled payment is announced through the `Notifier` seam so other
//! subsystems (workspace refresh, audit trail) can react without the
//! reconciliation path knowing about them. Publishing is best-effort.

use async_trait::async_trait;
use time::Date;

/// Published exactly once per fresh settlement, never on redelivery.
#[derive(Debug, Clone)]
pub struct PaymentSettled {
    pub tenant_id: i64,
    pub invoice_id: i64,
    pub due_date: Option<Date>,
    pub payment_id: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: PaymentSettled);
}

/// Default notifier: a structured log line.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: PaymentSettled) {
        tracing::info!(
            tenant_id = event.tenant_id,
            invoice_id = event.invoice_id,
            due_date = ?event.due_date,
            payment_id = event.payment_id.as_deref(),
            "payment settled"
        );
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Captures published events for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<PaymentSettled>>,
    }

    impl RecordingNotifier {
        pub fn events(&self) -> Vec<PaymentSettled> {
            match self.events.lock() {
                Ok(g) => g.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, event: PaymentSettled) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }
}
