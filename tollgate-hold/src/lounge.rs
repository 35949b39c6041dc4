use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tollgate_core::lounge::{LoungeCapacityHold, NewLoungeHold, TimeSlot};
use tollgate_core::{Clock, HoldError, HoldResult, HoldStore, UnitOfWork};
use tracing::{debug, info};
use uuid::Uuid;

/// Guest-count capacity per lounge, date and overlapping time slot.
#[derive(Clone)]
pub struct LoungeCapacityManager {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
}

impl LoungeCapacityManager {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `max − confirmed − live held` over overlapping slots, floored at zero.
    pub async fn available_capacity(
        &self,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> HoldResult<i32> {
        slot.validate()?;
        let max_capacity = self
            .store
            .lounge_capacity(lounge_id)
            .await?
            .ok_or_else(|| HoldError::not_found("lounge", lounge_id))?;

        let occupancy = self
            .store
            .lounge_occupancy(lounge_id, date, slot, self.clock.now())
            .await?;
        Ok(occupancy.available(max_capacity))
    }

    /// Insert a `held` row without checking capacity.
    ///
    /// Callers are expected to check [`available_capacity`](Self::available_capacity)
    /// first; the two steps are not atomic. [`reserve`](Self::reserve) does both
    /// under a lock on the lounge.
    pub async fn create_hold(&self, hold: NewLoungeHold) -> HoldResult<LoungeCapacityHold> {
        hold.validate()?;
        let now = self.clock.now();

        let mut uow = self.store.begin().await?;
        let created = uow.insert_lounge_hold(hold, now).await?;
        uow.commit().await?;

        debug!(hold_id = %created.id, intent_id = %created.intent_id, guests = created.guests, "Lounge hold created");
        Ok(created)
    }

    /// Check capacity and insert in one unit of work.
    pub async fn reserve(&self, hold: NewLoungeHold) -> HoldResult<LoungeCapacityHold> {
        hold.validate()?;
        let now = self.clock.now();

        let mut uow = self.store.begin().await?;
        let created = reserve_in(uow.as_mut(), hold, now).await?;
        uow.commit().await?;
        Ok(created)
    }

    pub async fn release_for_intent(&self, intent_id: Uuid) -> HoldResult<u64> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        let released = uow.release_lounge_holds(intent_id, now).await?;
        uow.commit().await?;
        Ok(released)
    }

    /// Only rows that are still live are confirmed.
    pub async fn confirm_for_intent(&self, intent_id: Uuid) -> HoldResult<u64> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        let confirmed = uow.confirm_lounge_holds(intent_id, now).await?;
        uow.commit().await?;
        Ok(confirmed)
    }

    pub async fn holds_for_intent(&self, intent_id: Uuid) -> HoldResult<Vec<LoungeCapacityHold>> {
        self.store.lounge_holds_for_intent(intent_id).await
    }

    /// Flip lapsed `held` rows to `released`. Capacity math already ignores
    /// them; this keeps the table honest.
    pub async fn sweep_expired(&self) -> HoldResult<u64> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        let released = uow.sweep_expired_lounge_holds(now).await?;
        uow.commit().await?;

        if released > 0 {
            info!(released, "Released lapsed lounge holds");
        }
        Ok(released)
    }
}

/// Lock the lounge, re-check capacity and insert the hold.
pub(crate) async fn reserve_in(
    uow: &mut dyn UnitOfWork,
    hold: NewLoungeHold,
    now: DateTime<Utc>,
) -> HoldResult<LoungeCapacityHold> {
    let max_capacity = uow
        .lock_lounge(hold.lounge_id)
        .await?
        .ok_or_else(|| HoldError::not_found("lounge", hold.lounge_id))?;

    let occupancy = uow
        .lounge_occupancy(hold.lounge_id, hold.date, hold.slot, now)
        .await?;
    let available = occupancy.available(max_capacity);
    if hold.guests > available {
        info!(lounge_id = %hold.lounge_id, requested = hold.guests, available, "Lounge slot full");
        return Err(HoldError::InsufficientCapacity {
            requested: hold.guests,
            available,
        });
    }

    uow.insert_lounge_hold(hold, now).await
}
