use crate::audit::{NewPaymentAudit, PaymentAudit, PaymentEventType};
use crate::error::HoldResult;
use crate::intent::{BookingIntent, IntentStatus, IntentTransition, NewIntent};
use crate::lounge::{LoungeCapacityHold, LoungeOccupancy, NewLoungeHold, TimeSlot};
use crate::seat::TripSeat;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Result of an idempotent insert.
#[derive(Debug, Clone)]
pub struct InsertedIntent {
    pub intent: BookingIntent,
    /// False when a row for `(user, idempotency_key)` already existed.
    pub created: bool,
}

/// Storage entry point: non-transactional reads plus `begin()` for writes.
#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Open a unit of work. Dropping it without `commit` rolls everything back.
    async fn begin(&self) -> HoldResult<Box<dyn UnitOfWork>>;

    async fn get_intent(&self, id: Uuid) -> HoldResult<Option<BookingIntent>>;

    async fn find_intent_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> HoldResult<Option<BookingIntent>>;

    /// Seat rows for the given ids; unknown ids are simply absent.
    async fn seats(&self, seat_ids: &[Uuid]) -> HoldResult<Vec<TripSeat>>;

    /// Declared maximum capacity, `None` if the lounge does not exist.
    async fn lounge_capacity(&self, lounge_id: Uuid) -> HoldResult<Option<i32>>;

    async fn lounge_occupancy(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy>;

    async fn lounge_holds_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<LoungeCapacityHold>>;

    /// `held` intents whose `expires_at` has passed, oldest first.
    async fn expired_held_intents(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>>;

    /// `payment_pending` intents initiated before `cutoff`, oldest first.
    async fn payment_pending_timed_out(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> HoldResult<Vec<Uuid>>;

    async fn oldest_expired_held(&self, now: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>>;

    async fn oldest_timed_out_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>>;

    /// `confirming` intents whose confirmation deadline has passed, oldest first.
    async fn confirming_timed_out(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>>;

    async fn oldest_timed_out_confirming(
        &self,
        now: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>>;

    /// The first (non-duplicate) audit row for a delivery, if any.
    async fn find_audit(
        &self,
        payment_uid: &str,
        event_type: PaymentEventType,
        idempotency_key: &str,
    ) -> HoldResult<Option<PaymentAudit>>;

    async fn audits_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>>;

    async fn amount_mismatches(&self, limit: i64) -> HoldResult<Vec<PaymentAudit>>;
}

/// One transaction. Every write in the engine goes through here.
///
/// All conditional updates return the number of rows they matched; a zero is
/// a normal outcome the caller interprets, never an error on its own.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(self: Box<Self>) -> HoldResult<()>;

    // intents

    /// Insert or, on `(user, idempotency_key)` conflict, return the existing row.
    async fn insert_intent(&mut self, intent: NewIntent, now: DateTime<Utc>)
        -> HoldResult<InsertedIntent>;

    /// Conditional update guarded by `transition.sources()`.
    async fn transition_intent(
        &mut self,
        intent_id: Uuid,
        transition: &IntentTransition,
        now: DateTime<Utc>,
    ) -> HoldResult<u64>;

    async fn intent_status(&mut self, intent_id: Uuid) -> HoldResult<Option<IntentStatus>>;

    /// Record the gateway-reported status; never touches `status`.
    async fn set_gateway_status(
        &mut self,
        intent_id: Uuid,
        gateway_status: &str,
        now: DateTime<Utc>,
    ) -> HoldResult<u64>;

    // seats

    /// Hold every requested seat that is currently available. Returns how many.
    async fn hold_seats(
        &mut self,
        intent_id: Uuid,
        seat_ids: &[Uuid],
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64>;

    /// Push out the deadline of seats the intent still holds live (`held_until >= now`).
    async fn extend_seat_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64>;

    async fn release_seats(&mut self, intent_id: Uuid) -> HoldResult<u64>;

    /// Turn the intent's live holds into bookings. Lapsed holds are left alone.
    async fn book_seats(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64>;

    /// Clear lapsed holds, skipping those owned by a `confirming` intent.
    async fn sweep_expired_seat_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64>;

    /// Clear holds naming an intent that does not exist.
    async fn sweep_orphaned_seat_holds(&mut self) -> HoldResult<u64>;

    // lounges

    /// Capacity read that blocks concurrent lockers of the same lounge until commit.
    async fn lock_lounge(&mut self, lounge_id: Uuid) -> HoldResult<Option<i32>>;

    async fn lounge_occupancy(
        &mut self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy>;

    async fn insert_lounge_hold(
        &mut self,
        hold: NewLoungeHold,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeCapacityHold>;

    /// Push out `held_until` of the intent's live `held` rows.
    async fn extend_lounge_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64>;

    async fn release_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>)
        -> HoldResult<u64>;

    /// Confirm the intent's live `held` rows. Lapsed rows are left alone.
    async fn confirm_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>)
        -> HoldResult<u64>;

    /// Release lapsed rows, skipping those owned by a `confirming` intent.
    async fn sweep_expired_lounge_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64>;

    // payment audits

    /// Append; a repeat of `(payment_uid, event_type, idempotency_key)` is
    /// stored with `is_duplicate = true`.
    async fn append_audit(
        &mut self,
        audit: NewPaymentAudit,
        now: DateTime<Utc>,
    ) -> HoldResult<PaymentAudit>;
}
