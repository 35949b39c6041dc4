use crate::intent::{expire_in, ExpiryOutcome, HoldPolicy};
use crate::lounge::LoungeCapacityManager;
use crate::seat::SeatHoldManager;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tollgate_core::{Clock, HoldResult, HoldStore, IntentTransition};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Totals from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_held: usize,
    pub timed_out_pending: usize,
    /// `confirming` intents failed after their deadline.
    pub stuck_confirmations: usize,
    pub failures: usize,
    pub seat_holds_swept: u64,
    pub orphans_swept: u64,
    pub lounge_holds_swept: u64,
    /// How long the oldest overdue intent left behind has been overdue.
    #[serde(skip)]
    pub lag: Option<Duration>,
}

impl SweepReport {
    pub fn lag_seconds(&self) -> f64 {
        self.lag
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

/// Finds abandoned intents and expires them with their holds.
pub struct Reaper {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
    batch_size: i64,
    seats: SeatHoldManager,
    lounges: LoungeCapacityManager,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn HoldStore>,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
        batch_size: i64,
    ) -> Self {
        Self {
            seats: SeatHoldManager::new(store.clone(), clock.clone()),
            lounges: LoungeCapacityManager::new(store.clone(), clock.clone()),
            store,
            clock,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn get_expired_held_intents(&self, limit: i64) -> HoldResult<Vec<Uuid>> {
        self.store.expired_held_intents(self.clock.now(), limit).await
    }

    pub async fn get_payment_pending_timed_out(
        &self,
        timeout: Duration,
        limit: i64,
    ) -> HoldResult<Vec<Uuid>> {
        self.store
            .payment_pending_timed_out(self.clock.now() - timeout, limit)
            .await
    }

    pub async fn get_confirming_timed_out(&self, limit: i64) -> HoldResult<Vec<Uuid>> {
        self.store.confirming_timed_out(self.clock.now(), limit).await
    }

    /// One unit of work: status flip, seat release, lounge release. Safe to
    /// repeat; a second call finds nothing to change.
    pub async fn expire_intent_and_release_holds(&self, intent_id: Uuid) -> HoldResult<ExpiryOutcome> {
        let mut uow = self.store.begin().await?;
        let outcome = expire_in(uow.as_mut(), intent_id, self.clock.now()).await?;
        uow.commit().await?;

        if outcome.expired {
            debug!(
                %intent_id,
                seats = outcome.seats_released,
                lounge_holds = outcome.lounge_holds_released,
                "Intent expired"
            );
        }
        Ok(outcome)
    }

    /// `confirming → confirmation_failed` for an intent whose downstream
    /// bookings never reported back. Payment was taken, so this alerts.
    pub async fn fail_stuck_confirmation(&self, intent_id: Uuid) -> HoldResult<bool> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        if uow
            .transition_intent(intent_id, &IntentTransition::ConfirmationFailed, now)
            .await?
            == 0
        {
            return Ok(false);
        }
        let seats = uow.release_seats(intent_id).await?;
        let lounges = uow.release_lounge_holds(intent_id, now).await?;
        uow.commit().await?;

        error!(alert = "payment_audit", %intent_id, seats, lounge_holds = lounges, "Confirmation timed out, refund required");
        Ok(true)
    }

    /// One bounded pass over the candidate queries plus hold maintenance.
    pub async fn sweep_once(&self) -> HoldResult<SweepReport> {
        let mut report = SweepReport::default();

        let held = self.get_expired_held_intents(self.batch_size).await?;
        let (expired, failed) = self.expire_all(&held).await;
        report.expired_held = expired;
        report.failures += failed;

        let pending = self
            .get_payment_pending_timed_out(self.policy.payment_timeout, self.batch_size)
            .await?;
        let (expired, failed) = self.expire_all(&pending).await;
        report.timed_out_pending = expired;
        report.failures += failed;

        for id in self.get_confirming_timed_out(self.batch_size).await? {
            match self.fail_stuck_confirmation(id).await {
                Ok(true) => report.stuck_confirmations += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(intent_id = %id, error = %e, "Failed to time out confirmation");
                    report.failures += 1;
                }
            }
        }

        report.seat_holds_swept = self.seats.sweep_expired().await?;
        report.orphans_swept = self.seats.sweep_orphaned().await?;
        report.lounge_holds_swept = self.lounges.sweep_expired().await?;
        report.lag = self.lag().await?;

        if report.expired_held + report.timed_out_pending + report.stuck_confirmations + report.failures
            > 0
        {
            info!(
                expired_held = report.expired_held,
                timed_out_pending = report.timed_out_pending,
                stuck_confirmations = report.stuck_confirmations,
                failures = report.failures,
                lag_seconds = report.lag_seconds(),
                "Reaper sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire_all(&self, ids: &[Uuid]) -> (usize, usize) {
        let mut expired = 0;
        let mut failed = 0;
        for id in ids {
            match self.expire_intent_and_release_holds(*id).await {
                Ok(outcome) if outcome.expired => expired += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(intent_id = %id, error = %e, "Failed to expire intent");
                    failed += 1;
                }
            }
        }
        (expired, failed)
    }

    /// Age of the most overdue intent still waiting.
    async fn lag(&self) -> HoldResult<Option<Duration>> {
        let now = self.clock.now();
        let cutoff = now - self.policy.payment_timeout;

        let held = self
            .store
            .oldest_expired_held(now)
            .await?
            .map(|expires_at| now - expires_at);
        let pending = self
            .store
            .oldest_timed_out_pending(cutoff)
            .await?
            .map(|initiated_at| cutoff - initiated_at);
        let confirming = self
            .store
            .oldest_timed_out_confirming(now)
            .await?
            .map(|expires_at| now - expires_at);

        Ok(held.into_iter().chain(pending).chain(confirming).max())
    }
}
