use crate::metrics::ReaperMetrics;
use std::sync::Arc;
use tollgate_core::{Clock, HoldStore};
use tollgate_hold::{HoldPolicy, PaymentAuditLog, Reaper};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HoldStore>,
    pub clock: Arc<dyn Clock>,
    pub reaper: Arc<Reaper>,
    pub audit_log: PaymentAuditLog,
    pub metrics: Arc<ReaperMetrics>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn HoldStore>,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
        batch_size: i64,
        metrics: Arc<ReaperMetrics>,
    ) -> Self {
        Self {
            reaper: Arc::new(Reaper::new(store.clone(), clock.clone(), policy, batch_size)),
            audit_log: PaymentAuditLog::new(store.clone(), clock.clone()),
            store,
            clock,
            metrics,
        }
    }
}
