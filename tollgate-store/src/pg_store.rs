use crate::{audit_repo, intent_repo, lounge_repo, seat_repo};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Transaction};
use tollgate_core::audit::{NewPaymentAudit, PaymentAudit, PaymentEventType};
use tollgate_core::lounge::{LoungeCapacityHold, LoungeOccupancy, NewLoungeHold, TimeSlot};
use tollgate_core::repository::InsertedIntent;
use tollgate_core::seat::TripSeat;
use tollgate_core::{
    BookingIntent, HoldError, HoldResult, HoldStore, IntentStatus, IntentTransition, NewIntent,
    UnitOfWork,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgHoldStore {
    pool: PgPool,
}

impl PgHoldStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> HoldResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| HoldError::persistence("acquire", e))
    }
}

#[async_trait]
impl HoldStore for PgHoldStore {
    async fn begin(&self) -> HoldResult<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HoldError::persistence("begin", e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_intent(&self, id: Uuid) -> HoldResult<Option<BookingIntent>> {
        let mut conn = self.conn().await?;
        intent_repo::get(&mut conn, id).await
    }

    async fn find_intent_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> HoldResult<Option<BookingIntent>> {
        let mut conn = self.conn().await?;
        intent_repo::find_by_key(&mut conn, user_id, idempotency_key).await
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> HoldResult<Vec<TripSeat>> {
        let mut conn = self.conn().await?;
        seat_repo::fetch(&mut conn, seat_ids).await
    }

    async fn lounge_capacity(&self, lounge_id: Uuid) -> HoldResult<Option<i32>> {
        let mut conn = self.conn().await?;
        lounge_repo::capacity(&mut conn, lounge_id).await
    }

    async fn lounge_occupancy(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy> {
        let mut conn = self.conn().await?;
        lounge_repo::occupancy(&mut conn, lounge_id, date, slot, now).await
    }

    async fn lounge_holds_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<LoungeCapacityHold>> {
        let mut conn = self.conn().await?;
        lounge_repo::for_intent(&mut conn, intent_id).await
    }

    async fn expired_held_intents(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        let mut conn = self.conn().await?;
        intent_repo::expired_held(&mut conn, now, limit).await
    }

    async fn payment_pending_timed_out(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> HoldResult<Vec<Uuid>> {
        let mut conn = self.conn().await?;
        intent_repo::pending_timed_out(&mut conn, cutoff, limit).await
    }

    async fn oldest_expired_held(&self, now: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn().await?;
        intent_repo::oldest_expired_held(&mut conn, now).await
    }

    async fn oldest_timed_out_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn().await?;
        intent_repo::oldest_timed_out_pending(&mut conn, cutoff).await
    }

    async fn confirming_timed_out(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        let mut conn = self.conn().await?;
        intent_repo::confirming_timed_out(&mut conn, now, limit).await
    }

    async fn oldest_timed_out_confirming(
        &self,
        now: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn().await?;
        intent_repo::oldest_timed_out_confirming(&mut conn, now).await
    }

    async fn find_audit(
        &self,
        payment_uid: &str,
        event_type: PaymentEventType,
        idempotency_key: &str,
    ) -> HoldResult<Option<PaymentAudit>> {
        let mut conn = self.conn().await?;
        audit_repo::find(&mut conn, payment_uid, event_type, idempotency_key).await
    }

    async fn audits_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>> {
        let mut conn = self.conn().await?;
        audit_repo::for_intent(&mut conn, intent_id).await
    }

    async fn amount_mismatches(&self, limit: i64) -> HoldResult<Vec<PaymentAudit>> {
        let mut conn = self.conn().await?;
        audit_repo::mismatches(&mut conn, limit).await
    }
}

/// A Postgres transaction. Dropped without `commit`, sqlx rolls it back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> HoldResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| HoldError::persistence("commit", e))
    }

    async fn insert_intent(
        &mut self,
        intent: NewIntent,
        now: DateTime<Utc>,
    ) -> HoldResult<InsertedIntent> {
        intent_repo::insert(&mut self.tx, intent, now).await
    }

    async fn transition_intent(
        &mut self,
        intent_id: Uuid,
        transition: &IntentTransition,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        intent_repo::transition(&mut self.tx, intent_id, transition, now).await
    }

    async fn intent_status(&mut self, intent_id: Uuid) -> HoldResult<Option<IntentStatus>> {
        intent_repo::status(&mut self.tx, intent_id).await
    }

    async fn set_gateway_status(
        &mut self,
        intent_id: Uuid,
        gateway_status: &str,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        intent_repo::set_gateway_status(&mut self.tx, intent_id, gateway_status, now).await
    }

    async fn hold_seats(
        &mut self,
        intent_id: Uuid,
        seat_ids: &[Uuid],
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        seat_repo::hold(&mut self.tx, intent_id, seat_ids, held_until, now).await
    }

    async fn extend_seat_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        seat_repo::extend(&mut self.tx, intent_id, held_until, now).await
    }

    async fn release_seats(&mut self, intent_id: Uuid) -> HoldResult<u64> {
        seat_repo::release(&mut self.tx, intent_id).await
    }

    async fn book_seats(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        seat_repo::book(&mut self.tx, intent_id, now).await
    }

    async fn sweep_expired_seat_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64> {
        seat_repo::sweep_expired(&mut self.tx, now).await
    }

    async fn sweep_orphaned_seat_holds(&mut self) -> HoldResult<u64> {
        seat_repo::sweep_orphaned(&mut self.tx).await
    }

    async fn lock_lounge(&mut self, lounge_id: Uuid) -> HoldResult<Option<i32>> {
        lounge_repo::lock(&mut self.tx, lounge_id).await
    }

    async fn lounge_occupancy(
        &mut self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy> {
        lounge_repo::occupancy(&mut self.tx, lounge_id, date, slot, now).await
    }

    async fn insert_lounge_hold(
        &mut self,
        hold: NewLoungeHold,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeCapacityHold> {
        lounge_repo::insert(&mut self.tx, hold, now).await
    }

    async fn extend_lounge_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        lounge_repo::extend(&mut self.tx, intent_id, held_until, now).await
    }

    async fn release_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        lounge_repo::release(&mut self.tx, intent_id, now).await
    }

    async fn confirm_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        lounge_repo::confirm(&mut self.tx, intent_id, now).await
    }

    async fn sweep_expired_lounge_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64> {
        lounge_repo::sweep_expired(&mut self.tx, now).await
    }

    async fn append_audit(
        &mut self,
        audit: NewPaymentAudit,
        now: DateTime<Utc>,
    ) -> HoldResult<PaymentAudit> {
        audit_repo::append(&mut self.tx, audit, now).await
    }
}
