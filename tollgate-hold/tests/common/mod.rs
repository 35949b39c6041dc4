#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tollgate_core::gateway::BookingWriter;
use tollgate_core::intent::{
    BookingLinks, BusLeg, FareBreakdown, IntentPayload, LoungeLeg, PricingSnapshot,
};
use tollgate_core::lounge::TimeSlot;
use tollgate_core::audit::{PaymentAudit, PaymentEventType};
use tollgate_core::lounge::{LoungeCapacityHold, LoungeOccupancy};
use tollgate_core::seat::TripSeat;
use tollgate_core::{BookingIntent, HoldError, HoldResult, HoldStore, ManualClock, UnitOfWork};
use tollgate_hold::{
    BookingIntentStore, CreateIntent, HoldPolicy, LoungeCapacityManager, PaymentAuditLog,
    Reaper, SeatHoldManager,
};
use tollgate_store::MemoryHoldStore;
use uuid::Uuid;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap()
}

pub fn travel_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

pub fn slot(start: (u32, u32), end: (u32, u32)) -> TimeSlot {
    TimeSlot::new(
        NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
    )
    .unwrap()
}

pub struct Harness {
    pub store: MemoryHoldStore,
    pub clock: Arc<ManualClock>,
    pub seats: SeatHoldManager,
    pub lounges: LoungeCapacityManager,
    pub intents: BookingIntentStore,
    pub audit_log: PaymentAuditLog,
    pub reaper: Reaper,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryHoldStore::new();
        let shared: Arc<dyn HoldStore> = Arc::new(store.clone());
        Self::over(store, shared)
    }

    /// Services run against `shared`; `store` stays available for inspection.
    pub fn over(store: MemoryHoldStore, shared: Arc<dyn HoldStore>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let policy = HoldPolicy::default();

        Self {
            seats: SeatHoldManager::new(shared.clone(), clock.clone()),
            lounges: LoungeCapacityManager::new(shared.clone(), clock.clone()),
            intents: BookingIntentStore::new(shared.clone(), clock.clone(), policy),
            audit_log: PaymentAuditLog::new(shared.clone(), clock.clone()),
            reaper: Reaper::new(shared, clock.clone(), policy, 50),
            store,
            clock,
        }
    }
}

pub fn bus_request(user_id: Uuid, seat_ids: Vec<Uuid>, key: &str) -> CreateIntent {
    let seat_count = seat_ids.len() as i64;
    CreateIntent {
        user_id,
        payload: IntentPayload {
            bus: Some(BusLeg {
                trip_id: Uuid::from_u128(1),
                seat_ids,
                boarding_point: Some("Colombo".into()),
                dropping_point: Some("Galle".into()),
                passenger_names: vec![],
            }),
            ..IntentPayload::default()
        },
        fare: FareBreakdown {
            currency: "LKR".into(),
            bus_fare: 1_200 * seat_count,
            fees: 100,
            ..FareBreakdown::default()
        },
        pricing: pricing(),
        idempotency_key: key.into(),
    }
}

pub fn lounge_request(user_id: Uuid, lounge_id: Uuid, guests: i32, key: &str) -> CreateIntent {
    CreateIntent {
        user_id,
        payload: IntentPayload {
            post_trip_lounge: Some(LoungeLeg {
                lounge_id,
                date: travel_date(),
                slot: slot((18, 0), (20, 0)),
                guests,
            }),
            ..IntentPayload::default()
        },
        fare: FareBreakdown {
            currency: "LKR".into(),
            post_trip_lounge_fare: 800 * guests as i64,
            ..FareBreakdown::default()
        },
        pricing: pricing(),
        idempotency_key: key.into(),
    }
}

fn pricing() -> PricingSnapshot {
    PricingSnapshot {
        captured_at: t0(),
        currency: "LKR".into(),
        seat_unit_price: 1_200,
        lounge_guest_unit_price: 800,
        tax_rate: 0.0,
        rules: json!({ "source": "test" }),
    }
}

/// Counts how many times bookings were created.
#[derive(Default)]
pub struct CountingBookingWriter {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingBookingWriter {
    pub fn failing() -> Self {
        Self { calls: AtomicUsize::new(0), fail: true }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookingWriter for CountingBookingWriter {
    async fn create_bookings(
        &self,
        intent: &BookingIntent,
    ) -> Result<BookingLinks, Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("ticketing service unavailable".into());
        }
        Ok(BookingLinks {
            bus_booking_id: intent.payload.bus.as_ref().map(|_| Uuid::new_v4()),
            pre_trip_lounge_booking_id: intent.payload.pre_trip_lounge.as_ref().map(|_| Uuid::new_v4()),
            post_trip_lounge_booking_id: intent.payload.post_trip_lounge.as_ref().map(|_| Uuid::new_v4()),
        })
    }
}

/// Delegates to a memory store, failing one chosen `begin` call.
pub struct FlakyStore {
    inner: MemoryHoldStore,
    countdown: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryHoldStore) -> Self {
        Self { inner, countdown: AtomicUsize::new(0) }
    }

    /// Let `n` more units of work open, fail the next one, then behave.
    pub fn fail_begin_after(&self, n: usize) {
        self.countdown.store(n + 1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HoldStore for FlakyStore {
    async fn begin(&self) -> HoldResult<Box<dyn UnitOfWork>> {
        let left = self.countdown.load(Ordering::SeqCst);
        if left > 0 {
            self.countdown.store(left - 1, Ordering::SeqCst);
            if left == 1 {
                return Err(HoldError::persistence("begin", "connection reset by peer"));
            }
        }
        self.inner.begin().await
    }

    async fn get_intent(&self, id: Uuid) -> HoldResult<Option<BookingIntent>> {
        self.inner.get_intent(id).await
    }

    async fn find_intent_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> HoldResult<Option<BookingIntent>> {
        self.inner.find_intent_by_key(user_id, idempotency_key).await
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> HoldResult<Vec<TripSeat>> {
        self.inner.seats(seat_ids).await
    }

    async fn lounge_capacity(&self, lounge_id: Uuid) -> HoldResult<Option<i32>> {
        self.inner.lounge_capacity(lounge_id).await
    }

    async fn lounge_occupancy(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        now: DateTime<Utc>,
    ) -> HoldResult<LoungeOccupancy> {
        self.inner.lounge_occupancy(lounge_id, date, slot, now).await
    }

    async fn lounge_holds_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<LoungeCapacityHold>> {
        self.inner.lounge_holds_for_intent(intent_id).await
    }

    async fn expired_held_intents(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        self.inner.expired_held_intents(now, limit).await
    }

    async fn payment_pending_timed_out(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> HoldResult<Vec<Uuid>> {
        self.inner.payment_pending_timed_out(cutoff, limit).await
    }

    async fn oldest_expired_held(&self, now: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> {
        self.inner.oldest_expired_held(now).await
    }

    async fn oldest_timed_out_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        self.inner.oldest_timed_out_pending(cutoff).await
    }

    async fn confirming_timed_out(&self, now: DateTime<Utc>, limit: i64) -> HoldResult<Vec<Uuid>> {
        self.inner.confirming_timed_out(now, limit).await
    }

    async fn oldest_timed_out_confirming(
        &self,
        now: DateTime<Utc>,
    ) -> HoldResult<Option<DateTime<Utc>>> {
        self.inner.oldest_timed_out_confirming(now).await
    }

    async fn find_audit(
        &self,
        payment_uid: &str,
        event_type: PaymentEventType,
        idempotency_key: &str,
    ) -> HoldResult<Option<PaymentAudit>> {
        self.inner.find_audit(payment_uid, event_type, idempotency_key).await
    }

    async fn audits_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>> {
        self.inner.audits_for_intent(intent_id).await
    }

    async fn amount_mismatches(&self, limit: i64) -> HoldResult<Vec<PaymentAudit>> {
        self.inner.amount_mismatches(limit).await
    }
}
