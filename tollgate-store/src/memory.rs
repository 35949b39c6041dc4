//! In-process backend with the same semantics as the Postgres one.
//!
//! A unit of work takes the whole-store lock, edits a staged copy and writes
//! it back on commit, so concurrent callers serialize the way row locks would
//! make them. Do not call `HoldStore` reads while a unit of work is open on
//! the same task.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tollgate_core::audit::{NewPaymentAudit, PaymentAudit, PaymentEventType};
use tollgate_core::lounge::{
    LoungeCapacityHold, LoungeHoldStatus, LoungeOccupancy, NewLoungeHold, TimeSlot,
};
use tollgate_core::repository::InsertedIntent;
use tollgate_core::seat::{SeatStatus, TripSeat};
use tollgate_core::{
    BookingIntent, HoldResult, HoldStore, IntentStatus, IntentTransition, NewIntent, UnitOfWork,
};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    intents: HashMap<Uuid, BookingIntent>,
    seats: HashMap<Uuid, TripSeat>,
    lounges: HashMap<Uuid, i32>,
    lounge_holds: Vec<LoungeCapacityHold>,
    audits: Vec<PaymentAudit>,
}

impl MemoryState {
    fn find_intent_by_key(&self, user_id: Uuid, key: &str) -> Option<&BookingIntent> {
        self.intents
            .values()
            .find(|i| i.user_id == user_id && i.idempotency_key == key)
    }

    fn occupancy(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: &TimeSlot,
        now: DateTime<Utc>,
    ) -> LoungeOccupancy {
        LoungeOccupancy::tally(&self.lounge_holds, lounge_id, date, slot, now)
    }

    fn oldest<F>(&self, filter: F) -> Option<DateTime<Utc>>
    where
        F: Fn(&BookingIntent) -> Option<DateTime<Utc>>,
    {
        self.intents.values().filter_map(filter).min()
    }

    fn ids_by<F>(&self, filter: F, limit: i64) -> Vec<Uuid>
    where
        F: Fn(&BookingIntent) -> Option<DateTime<Utc>>,
    {
        let mut hits: Vec<(DateTime<Utc>, Uuid)> = self
            .intents
            .values()
            .filter_map(|i| filter(i).map(|t| (t, i.id)))
            .collect();
        hits.sort();
        hits.into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect()
    }

    /// With `live_only`, rows whose `held_until` has passed are left alone.
    fn settle_lounge_holds(
        &mut self,
        intent_id: Uuid,
        target: LoungeHoldStatus,
        now: DateTime<Utc>,
        live_only: bool,
    ) -> u64 {
        let mut count = 0;
        for hold in self.lounge_holds.iter_mut().filter(|h| {
            h.intent_id == intent_id
                && h.status == LoungeHoldStatus::Held
                && (!live_only || h.held_until >= now)
        }) {
            hold.status = target;
            hold.updated_at = now;
            count += 1;
        }
        count
    }
}

fn expired_held_at(now: DateTime<Utc>) -> impl Fn(&BookingIntent) -> Option<DateTime<Utc>> {
    move |i| match (i.status, i.expires_at) {
        (IntentStatus::Held, Some(t)) if t < now => Some(t),
        _ => None,
    }
}

fn confirming_overdue_at(now: DateTime<Utc>) -> impl Fn(&BookingIntent) -> Option<DateTime<Utc>> {
    move |i| match (i.status, i.expires_at) {
        (IntentStatus::Confirming, Some(t)) if t < now => Some(t),
        _ => None,
    }
}

fn is_confirming(intents: &HashMap<Uuid, BookingIntent>, id: Uuid) -> bool {
    intents
        .get(&id)
        .is_some_and(|i| i.status == IntentStatus::Confirming)
}

fn pending_before(cutoff: DateTime<Utc>) -> impl Fn(&BookingIntent) -> Option<DateTime<Utc>> {
    move |i| match (i.status, i.payment_initiated_at) {
        (IntentStatus::PaymentPending, Some(t)) if t < cutoff => Some(t),
        _ => None,
    }
}

fn held_live_by(seat: &TripSeat, intent_id: Uuid, now: DateTime<Utc>) -> bool {
    seat.held_by_intent_id == Some(intent_id)
        && seat.status == SeatStatus::Available
        && seat.held_until.is_some_and(|t| t >= now)
}

#[derive(Clone, Default)]
pub struct MemoryHoldStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_seat(&self, trip_id: Uuid, seat_number: &str) -> Uuid {
        let seat = TripSeat::new(trip_id, seat_number);
        let id = seat.id;
        self.state.lock().await.seats.insert(id, seat);
        id
    }

    pub async fn add_seats(&self, trip_id: Uuid, seat_numbers: &[&str]) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(seat_numbers.len());
        for number in seat_numbers {
            ids.push(self.add_seat(trip_id, number).await);
        }
        ids
    }

    pub async fn set_seat_status(&self, seat_id: Uuid, status: SeatStatus) {
        if let Some(seat) = self.state.lock().await.seats.get_mut(&seat_id) {
            seat.status = status;
        }
    }

    /// Plant a hold directly, bypassing the availability predicate.
    pub async fn force_seat_hold(&self, seat_id: Uuid, intent_id: Uuid, held_until: DateTime<Utc>) {
        if let Some(seat) = self.state.lock().await.seats.get_mut(&seat_id) {
            seat.held_by_intent_id = Some(intent_id);
            seat.held_until = Some(held_until);
        }
    }

    pub async fn seat(&self, seat_id: Uuid) -> Option<TripSeat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }

    pub async fn add_lounge(&self, max_capacity: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.lounges.insert(id, max_capacity);
        id
    }

    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn begin(&self) -> HoldResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }

    async fn get_intent(&self, id: Uuid) -> HoldResult<Option<BookingIntent>> {
        Ok(self.state.lock().await.intents.get(&id).cloned())
    }

    async fn find_intent_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> HoldResult<Option<BookingIntent>> {
        let state = self.state.lock().await;
        Ok(state.find_intent_by_key(user_id, idempotency_key).cloned())
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> HoldResult<Vec<TripSeat>> {
        let state = self.state.lock().await;
        Ok(seat_ids
            .iter()
            .filter_map(|id| state.seats.get(id).cloned())
            .collect())
    }

    async fn lounge_capacity(&self, lounge_id: Uuid) -> HoldResult<Option<i32>> {
        Ok(self.state.lock().await.lounges.get(&lounge_id).copied())
    }

    async fn lounge_occupancy(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy> {
        Ok(self.state.lock().await.occupancy(lounge_id, date, &slot, now))
    }

    async fn lounge_holds_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<LoungeCapacityHold>> {
        let state = self.state.lock().await;
        Ok(state
            .lounge_holds
            .iter()
            .filter(|h| h.intent_id == intent_id)
            .cloned()
            .collect())
    }

    async fn expired_held_intents(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        Ok(self.state.lock().await.ids_by(expired_held_at(now), limit))
    }

    async fn payment_pending_timed_out(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> HoldResult<Vec<Uuid>> {
        Ok(self.state.lock().await.ids_by(pending_before(cutoff), limit))
    }

    async fn oldest_expired_held(&self, now: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.oldest(expired_held_at(now)))
    }

    async fn oldest_timed_out_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.oldest(pending_before(cutoff)))
    }

    async fn confirming_timed_out(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        Ok(self.state.lock().await.ids_by(confirming_overdue_at(now), limit))
    }

    async fn oldest_timed_out_confirming(
        &self,
        now: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.oldest(confirming_overdue_at(now)))
    }

    async fn find_audit(
        &self,
        payment_uid: &str,
        event_type: PaymentEventType,
        idempotency_key: &str,
    ) -> HoldResult<Option<PaymentAudit>> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .find(|a| {
                !a.is_duplicate
                    && a.payment_uid == payment_uid
                    && a.event_type == event_type
                    && a.idempotency_key == idempotency_key
            })
            .cloned())
    }

    async fn audits_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .filter(|a| a.intent_id == intent_id)
            .cloned()
            .collect())
    }

    async fn amount_mismatches(&self, limit: i64) -> HoldResult<Vec<PaymentAudit>> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .rev()
            .filter(|a| !a.amounts_match && !a.is_duplicate)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> HoldResult<()> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn insert_intent(
        &mut self,
        intent: NewIntent,
        now: DateTime<Utc>,
    ) -> HoldResult<InsertedIntent> {
        let kind = intent.validate()?;
        if let Some(existing) = self
            .staged
            .find_intent_by_key(intent.user_id, &intent.idempotency_key)
        {
            return Ok(InsertedIntent { intent: existing.clone(), created: false });
        }

        let row = intent.into_intent(Uuid::new_v4(), kind, now);
        self.staged.intents.insert(row.id, row.clone());
        Ok(InsertedIntent { intent: row, created: true })
    }

    async fn transition_intent(
        &mut self,
        intent_id: Uuid,
        transition: &IntentTransition,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        let sources = transition.sources();
        match self.staged.intents.get_mut(&intent_id) {
            Some(intent) if sources.contains(&intent.status) => {
                transition.apply(intent, now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn intent_status(&mut self, intent_id: Uuid) -> HoldResult<Option<IntentStatus>> {
        Ok(self.staged.intents.get(&intent_id).map(|i| i.status))
    }

    async fn set_gateway_status(
        &mut self,
        intent_id: Uuid,
        gateway_status: &str,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        match self.staged.intents.get_mut(&intent_id) {
            Some(intent) => {
                intent.payment.gateway_status = Some(gateway_status.to_string());
                intent.updated_at = now;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn hold_seats(
        &mut self,
        intent_id: Uuid,
        seat_ids: &[Uuid],
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        let mut count = 0;
        for id in seat_ids {
            if let Some(seat) = self.staged.seats.get_mut(id) {
                let own = seat.status == SeatStatus::Available
                    && seat.held_by_intent_id == Some(intent_id);
                if own || seat.is_available_at(now) {
                    seat.held_by_intent_id = Some(intent_id);
                    seat.held_until = Some(held_until);
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn extend_seat_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        let mut count = 0;
        for seat in self
            .staged
            .seats
            .values_mut()
            .filter(|s| held_live_by(s, intent_id, now))
        {
            seat.held_until = Some(held_until);
            count += 1;
        }
        Ok(count)
    }

    async fn release_seats(&mut self, intent_id: Uuid) -> HoldResult<u64> {
        let mut count = 0;
        for seat in self
            .staged
            .seats
            .values_mut()
            .filter(|s| s.held_by_intent_id == Some(intent_id))
        {
            seat.clear_hold();
            count += 1;
        }
        Ok(count)
    }

    async fn book_seats(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        let mut count = 0;
        for seat in self
            .staged
            .seats
            .values_mut()
            .filter(|s| held_live_by(s, intent_id, now))
        {
            seat.status = SeatStatus::Booked;
            seat.clear_hold();
            count += 1;
        }
        Ok(count)
    }

    async fn sweep_expired_seat_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64> {
        let intents = &self.staged.intents;
        let mut count = 0;
        for seat in self.staged.seats.values_mut() {
            let Some(owner) = seat.held_by_intent_id else { continue };
            if seat.held_until.is_some_and(|t| t < now) && !is_confirming(intents, owner) {
                seat.clear_hold();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn sweep_orphaned_seat_holds(&mut self) -> HoldResult<u64> {
        let intents = &self.staged.intents;
        let mut count = 0;
        for seat in self.staged.seats.values_mut() {
            if let Some(owner) = seat.held_by_intent_id {
                if !intents.contains_key(&owner) {
                    seat.clear_hold();
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn lock_lounge(&mut self, lounge_id: Uuid) -> HoldResult<Option<i32>> {
        // The store-wide guard is already held.
        Ok(self.staged.lounges.get(&lounge_id).copied())
    }

    async fn lounge_occupancy(
        &mut self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy> {
        Ok(self.staged.occupancy(lounge_id, date, &slot, now))
    }

    async fn insert_lounge_hold(
        &mut self,
        hold: NewLoungeHold,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeCapacityHold> {
        hold.validate()?;
        let row = hold.into_hold(Uuid::new_v4(), now);
        self.staged.lounge_holds.push(row.clone());
        Ok(row)
    }

    async fn extend_lounge_holds(
        &mut self,
        intent_id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> HoldResult<u64> {
        let mut count = 0;
        for hold in self.staged.lounge_holds.iter_mut().filter(|h| {
            h.intent_id == intent_id && h.status == LoungeHoldStatus::Held && h.held_until >= now
        }) {
            hold.held_until = held_until;
            hold.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn release_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        Ok(self
            .staged
            .settle_lounge_holds(intent_id, LoungeHoldStatus::Released, now, false))
    }

    async fn confirm_lounge_holds(&mut self, intent_id: Uuid, now: DateTime<Utc>) -> HoldResult<u64> {
        Ok(self
            .staged
            .settle_lounge_holds(intent_id, LoungeHoldStatus::Confirmed, now, true))
    }

    async fn sweep_expired_lounge_holds(&mut self, now: DateTime<Utc>) -> HoldResult<u64> {
        let intents = &self.staged.intents;
        let mut count = 0;
        for hold in self.staged.lounge_holds.iter_mut().filter(|h| {
            h.status == LoungeHoldStatus::Held
                && h.held_until < now
                && !is_confirming(intents, h.intent_id)
        }) {
            hold.status = LoungeHoldStatus::Released;
            hold.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn append_audit(
        &mut self,
        audit: NewPaymentAudit,
        now: DateTime<Utc>,
    ) -> HoldResult<PaymentAudit> {
        let is_duplicate = self
            .staged
            .audits
            .iter()
            .any(|existing| !existing.is_duplicate && audit.same_delivery(existing));
        let row = audit.into_record(Uuid::new_v4(), is_duplicate, now);
        self.staged.audits.push(row.clone());
        Ok(row)
    }
}
