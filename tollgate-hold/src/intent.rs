use crate::lounge::reserve_in;
use crate::seat::hold_all_in;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_core::gateway::GatewayPaymentStatus;
use tollgate_core::intent::{BookingLinks, FareBreakdown, IntentPayload, PricingSnapshot};
use tollgate_core::lounge::NewLoungeHold;
use tollgate_core::{
    BookingIntent, Clock, HoldError, HoldResult, HoldStore, IntentStatus, IntentTransition,
    NewIntent, UnitOfWork,
};
use tollgate_store::app_config::BusinessRules;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The timeout classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    /// Before payment starts.
    pub hold_ttl: Duration,
    /// After payment starts, before the attempt is considered abandoned.
    pub payment_timeout: Duration,
    /// How long downstream bookings may take once payment succeeded.
    pub confirmation_timeout: Duration,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(10),
            payment_timeout: Duration::minutes(30),
            confirmation_timeout: Duration::minutes(5),
        }
    }
}

impl TryFrom<&BusinessRules> for HoldPolicy {
    type Error = HoldError;

    fn try_from(rules: &BusinessRules) -> Result<Self, Self::Error> {
        Ok(Self {
            hold_ttl: positive_seconds("hold_ttl_seconds", rules.hold_ttl_seconds)?,
            payment_timeout: positive_seconds("payment_timeout_seconds", rules.payment_timeout_seconds)?,
            confirmation_timeout: positive_seconds(
                "confirmation_timeout_seconds",
                rules.confirmation_timeout_seconds,
            )?,
        })
    }
}

fn positive_seconds(name: &str, secs: u64) -> HoldResult<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| HoldError::Validation(format!("{name} out of range: {secs}")))
}

/// A purchase request as received from upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIntent {
    pub user_id: Uuid,
    pub payload: IntentPayload,
    pub fare: FareBreakdown,
    pub pricing: PricingSnapshot,
    pub idempotency_key: String,
}

/// What one expiry attempt changed. All zero means someone else got there first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryOutcome {
    pub expired: bool,
    pub seats_released: u64,
    pub lounge_holds_released: u64,
}

/// Owns the intent state machine and composes the seat and lounge holds.
///
/// Every transition is a conditional update on the current status, run in
/// one unit of work together with the hold changes it implies.
#[derive(Clone)]
pub struct BookingIntentStore {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl BookingIntentStore {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>, policy: HoldPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn policy(&self) -> HoldPolicy {
        self.policy
    }

    /// Create the intent and take every hold it needs, or nothing at all.
    ///
    /// Replaying the same `(user, idempotency_key)` returns the stored intent
    /// untouched, whatever its status.
    pub async fn create(&self, request: CreateIntent) -> HoldResult<BookingIntent> {
        let now = self.clock.now();
        let expires_at = now + self.policy.hold_ttl;
        let new = NewIntent {
            user_id: request.user_id,
            payload: request.payload,
            fare: request.fare,
            pricing: request.pricing,
            idempotency_key: request.idempotency_key,
            expires_at,
        };
        new.validate()?;

        if let Some(existing) = self
            .store
            .find_intent_by_key(new.user_id, &new.idempotency_key)
            .await?
        {
            debug!(intent_id = %existing.id, "Replayed create request");
            return Ok(existing);
        }

        let mut uow = self.store.begin().await?;
        let inserted = uow.insert_intent(new, now).await?;
        if !inserted.created {
            return Ok(inserted.intent);
        }
        let intent = inserted.intent;

        let seat_ids = intent.payload.seat_ids();
        if !seat_ids.is_empty() {
            hold_all_in(uow.as_mut(), intent.id, seat_ids, expires_at, now).await?;
        }

        for (position, leg) in intent.payload.lounge_legs() {
            let hold = NewLoungeHold {
                lounge_id: leg.lounge_id,
                intent_id: intent.id,
                date: leg.date,
                slot: leg.slot,
                guests: leg.guests,
                held_until: expires_at,
            };
            let created = reserve_in(uow.as_mut(), hold, now).await?;
            debug!(intent_id = %intent.id, hold_id = %created.id, ?position, "Lounge capacity held");
        }

        uow.commit().await?;
        info!(
            intent_id = %intent.id,
            user_id = %intent.user_id,
            kind = intent.kind.as_str(),
            seats = seat_ids.len(),
            total = intent.total_amount,
            "Booking intent created"
        );
        Ok(intent)
    }

    pub async fn get(&self, intent_id: Uuid) -> HoldResult<BookingIntent> {
        self.store
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| HoldError::not_found("intent", intent_id))
    }

    pub async fn find_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> HoldResult<Option<BookingIntent>> {
        self.store.find_intent_by_key(user_id, idempotency_key).await
    }

    /// `held → payment_pending`, extending every hold to the payment deadline.
    pub async fn mark_payment_pending(
        &self,
        intent_id: Uuid,
        reference: &str,
        gateway: &str,
    ) -> HoldResult<BookingIntent> {
        let intent = self.get(intent_id).await?;
        let now = self.clock.now();
        let target = IntentStatus::PaymentPending;

        if intent.status == IntentStatus::Held && intent.is_overdue(now) {
            // Lapsed but not yet reaped: finish the job here.
            let mut uow = self.store.begin().await?;
            expire_in(uow.as_mut(), intent_id, now).await?;
            uow.commit().await?;
            return Err(HoldError::WrongState {
                id: intent_id,
                current: IntentStatus::Expired,
                target,
            });
        }

        let deadline = now + self.policy.payment_timeout;
        let transition = IntentTransition::PaymentPending {
            reference: reference.to_string(),
            gateway: gateway.to_string(),
            expires_at: deadline,
        };

        let mut uow = self.store.begin().await?;
        if uow.transition_intent(intent_id, &transition, now).await? == 0 {
            return Err(reject(uow.as_mut(), intent_id, target).await);
        }

        let expected = intent.payload.seat_ids().len();
        let extended = uow.extend_seat_holds(intent_id, deadline, now).await?;
        if (extended as usize) < expected {
            warn!(%intent_id, extended, expected, "Seat holds lost before payment");
            return Err(HoldError::SeatsUnavailable {
                requested: expected,
                acquired: extended,
            });
        }
        uow.extend_lounge_holds(intent_id, deadline, now).await?;
        uow.commit().await?;

        info!(%intent_id, reference, gateway, "Payment pending");
        self.get(intent_id).await
    }

    /// Record the gateway's success report. Status moves only through `confirm`.
    pub async fn mark_payment_success(&self, intent_id: Uuid) -> HoldResult<()> {
        self.record_gateway_status(intent_id, GatewayPaymentStatus::Success)
            .await
    }

    pub async fn record_gateway_status(
        &self,
        intent_id: Uuid,
        status: GatewayPaymentStatus,
    ) -> HoldResult<()> {
        let mut uow = self.store.begin().await?;
        let updated = uow
            .set_gateway_status(intent_id, status.as_str(), self.clock.now())
            .await?;
        if updated == 0 {
            return Err(HoldError::not_found("intent", intent_id));
        }
        uow.commit().await
    }

    /// Fence the intent while downstream bookings are created.
    ///
    /// Every hold is pushed out to the confirmation deadline. If any of them
    /// already lapsed the intent goes to `confirmation_failed` and
    /// `HoldsLost` is returned; the caller must not create bookings. Expiry
    /// and the hold sweeps leave `confirming` intents alone; the reaper fails
    /// them once the deadline passes.
    pub async fn begin_confirmation(&self, intent_id: Uuid) -> HoldResult<BookingIntent> {
        let intent = self.get(intent_id).await?;
        let now = self.clock.now();
        let deadline = now + self.policy.confirmation_timeout;
        let transition = IntentTransition::Confirming { expires_at: deadline };

        let mut uow = self.store.begin().await?;
        if uow.transition_intent(intent_id, &transition, now).await? == 0 {
            return Err(reject(uow.as_mut(), intent_id, transition.target()).await);
        }
        let seats = uow.extend_seat_holds(intent_id, deadline, now).await?;
        let lounges = uow.extend_lounge_holds(intent_id, deadline, now).await?;
        if let Some(lost) = shortfall(&intent, seats, lounges) {
            drop(uow);
            return Err(self.fail_lost_holds(intent_id, lost).await);
        }
        uow.commit().await?;

        info!(%intent_id, %deadline, "Confirmation started");
        self.get(intent_id).await
    }

    /// `{held, payment_pending, confirming} → confirmed`; books the seats and
    /// confirms the lounge holds in the same unit of work.
    ///
    /// Only holds that are still live are turned into bookings. Anything
    /// short of the full payload rolls back and fails the confirmation.
    pub async fn confirm(&self, intent_id: Uuid, links: BookingLinks) -> HoldResult<BookingIntent> {
        let intent = self.get(intent_id).await?;
        let now = self.clock.now();
        let transition = IntentTransition::Confirmed(links);

        let mut uow = self.store.begin().await?;
        if uow.transition_intent(intent_id, &transition, now).await? == 0 {
            return Err(reject(uow.as_mut(), intent_id, transition.target()).await);
        }
        let seats = uow.book_seats(intent_id, now).await?;
        let lounges = uow.confirm_lounge_holds(intent_id, now).await?;
        if let Some(lost) = shortfall(&intent, seats, lounges) {
            drop(uow);
            return Err(self.fail_lost_holds(intent_id, lost).await);
        }
        uow.commit().await?;

        info!(%intent_id, seats, lounge_holds = lounges, "Booking intent confirmed");
        self.get(intent_id).await
    }

    /// `{held, payment_pending} → expired`, releasing every hold. A no-op on
    /// an intent that has already left those states.
    pub async fn expire(&self, intent_id: Uuid) -> HoldResult<ExpiryOutcome> {
        let mut uow = self.store.begin().await?;
        let outcome = expire_in(uow.as_mut(), intent_id, self.clock.now()).await?;
        uow.commit().await?;
        Ok(outcome)
    }

    pub async fn cancel(&self, intent_id: Uuid) -> HoldResult<BookingIntent> {
        self.apply(intent_id, IntentTransition::Cancelled, true).await
    }

    /// Payment was taken but the bookings could not be made. Needs a refund.
    pub async fn mark_confirmation_failed(&self, intent_id: Uuid) -> HoldResult<BookingIntent> {
        let intent = self
            .apply(intent_id, IntentTransition::ConfirmationFailed, true)
            .await?;
        warn!(%intent_id, reference = ?intent.payment.gateway_reference, "Confirmation failed, refund required");
        Ok(intent)
    }

    /// Payment was taken against holds we no longer own.
    async fn fail_lost_holds(&self, intent_id: Uuid, lost: HoldError) -> HoldError {
        error!(alert = "payment_audit", %intent_id, error = %lost, "Holds lost before confirmation, refund required");
        match self
            .apply(intent_id, IntentTransition::ConfirmationFailed, true)
            .await
        {
            Ok(_) | Err(HoldError::WrongState { .. }) => lost,
            Err(e) => e,
        }
    }

    async fn apply(
        &self,
        intent_id: Uuid,
        transition: IntentTransition,
        release_holds: bool,
    ) -> HoldResult<BookingIntent> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        if uow.transition_intent(intent_id, &transition, now).await? == 0 {
            return Err(reject(uow.as_mut(), intent_id, transition.target()).await);
        }
        if release_holds {
            let seats = uow.release_seats(intent_id).await?;
            let lounges = uow.release_lounge_holds(intent_id, now).await?;
            debug!(%intent_id, seats, lounge_holds = lounges, "Holds released");
        }
        uow.commit().await?;

        info!(%intent_id, status = %transition.target(), "Booking intent transitioned");
        self.get(intent_id).await
    }
}

/// Turn a zero-row transition into the right error.
async fn reject(uow: &mut dyn UnitOfWork, intent_id: Uuid, target: IntentStatus) -> HoldError {
    match uow.intent_status(intent_id).await {
        Ok(Some(current)) => HoldError::WrongState {
            id: intent_id,
            current,
            target,
        },
        Ok(None) => HoldError::not_found("intent", intent_id),
        Err(e) => e,
    }
}

/// `HoldsLost` when fewer holds were touched than the payload asks for.
fn shortfall(intent: &BookingIntent, seats: u64, lounges: u64) -> Option<HoldError> {
    let want_seats = intent.payload.seat_ids().len() as u64;
    let want_lounges = intent.payload.lounge_legs().count() as u64;
    if seats >= want_seats && lounges >= want_lounges {
        return None;
    }
    Some(HoldError::HoldsLost {
        id: intent.id,
        detail: format!("{seats}/{want_seats} seats and {lounges}/{want_lounges} lounge holds still live"),
    })
}

/// Status flip first; holds are only released if this call won the race.
/// An unknown intent is `NotFound`; one that already left the expirable
/// states is a no-op.
pub(crate) async fn expire_in(
    uow: &mut dyn UnitOfWork,
    intent_id: Uuid,
    now: DateTime<Utc>,
) -> HoldResult<ExpiryOutcome> {
    if uow
        .transition_intent(intent_id, &IntentTransition::Expired, now)
        .await?
        == 0
    {
        return match uow.intent_status(intent_id).await? {
            Some(_) => Ok(ExpiryOutcome::default()),
            None => Err(HoldError::not_found("intent", intent_id)),
        };
    }

    let seats_released = uow.release_seats(intent_id).await?;
    let lounge_holds_released = uow.release_lounge_holds(intent_id, now).await?;
    Ok(ExpiryOutcome {
        expired: true,
        seats_released,
        lounge_holds_released,
    })
}
