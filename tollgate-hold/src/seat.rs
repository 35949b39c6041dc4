use chrono::{DateTime, Utc};
use std::sync::Arc;
use tollgate_core::seat::{validate_seat_ids, SeatAvailability};
use tollgate_core::{Clock, HoldError, HoldResult, HoldStore, UnitOfWork};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Conditional reservation of individual seat rows.
#[derive(Clone)]
pub struct SeatHoldManager {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
}

impl SeatHoldManager {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Hold whatever subset of `seat_ids` is currently available.
    ///
    /// Returns the number acquired. A short count is not an error here: the
    /// caller must compare it with the request and `release` on shortfall.
    /// Use [`SeatHoldManager::hold_all`] for all-or-nothing acquisition.
    pub async fn hold(
        &self,
        intent_id: Uuid,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> HoldResult<u64> {
        validate_seat_ids(seat_ids)?;
        let now = self.clock.now();

        let mut uow = self.store.begin().await?;
        let held = uow.hold_seats(intent_id, seat_ids, expires_at, now).await?;
        uow.commit().await?;

        if (held as usize) < seat_ids.len() {
            warn!(%intent_id, held, requested = seat_ids.len(), "Partial seat hold");
        } else {
            debug!(%intent_id, held, "Seats held");
        }
        Ok(held)
    }

    /// Hold every seat or none of them.
    pub async fn hold_all(
        &self,
        intent_id: Uuid,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> HoldResult<u64> {
        validate_seat_ids(seat_ids)?;
        let now = self.clock.now();

        let mut uow = self.store.begin().await?;
        let held = hold_all_in(uow.as_mut(), intent_id, seat_ids, expires_at, now).await?;
        uow.commit().await?;
        Ok(held)
    }

    /// Idempotent; a no-op when the intent holds nothing.
    pub async fn release(&self, intent_id: Uuid) -> HoldResult<u64> {
        let mut uow = self.store.begin().await?;
        let released = uow.release_seats(intent_id).await?;
        uow.commit().await?;

        debug!(%intent_id, released, "Seat holds released");
        Ok(released)
    }

    pub async fn check_availability(&self, seat_ids: &[Uuid]) -> HoldResult<SeatAvailability> {
        validate_seat_ids(seat_ids)?;
        let rows = self.store.seats(seat_ids).await?;
        Ok(SeatAvailability::partition(seat_ids, &rows, self.clock.now()))
    }

    pub async fn sweep_expired(&self) -> HoldResult<u64> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        let cleared = uow.sweep_expired_seat_holds(now).await?;
        uow.commit().await?;

        if cleared > 0 {
            info!(cleared, "Cleared lapsed seat holds");
        }
        Ok(cleared)
    }

    /// Clear holds whose intent row never made it to the store.
    pub async fn sweep_orphaned(&self) -> HoldResult<u64> {
        let mut uow = self.store.begin().await?;
        let cleared = uow.sweep_orphaned_seat_holds().await?;
        uow.commit().await?;

        if cleared > 0 {
            warn!(cleared, "Cleared orphaned seat holds");
        }
        Ok(cleared)
    }
}

/// Hold inside an open unit of work; on shortfall the caller must drop `uow`.
pub(crate) async fn hold_all_in(
    uow: &mut dyn UnitOfWork,
    intent_id: Uuid,
    seat_ids: &[Uuid],
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let held = uow.hold_seats(intent_id, seat_ids, expires_at, now).await?;
    if (held as usize) < seat_ids.len() {
        info!(%intent_id, held, requested = seat_ids.len(), "Seat hold short, rolling back");
        return Err(HoldError::SeatsUnavailable {
            requested: seat_ids.len(),
            acquired: held,
        });
    }
    Ok(held)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tollgate_core::seat::SeatStatus;
    use tollgate_core::ManualClock;
    use tollgate_store::MemoryHoldStore;

    fn setup() -> (MemoryHoldStore, Arc<ManualClock>, SeatHoldManager) {
        let store = MemoryHoldStore::new();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let manager = SeatHoldManager::new(Arc::new(store.clone()), clock.clone());
        (store, clock, manager)
    }

    #[tokio::test]
    async fn test_partial_hold_is_committed() {
        let (store, clock, manager) = setup();
        let trip = Uuid::new_v4();
        let seats = store.add_seats(trip, &["1A", "1B"]).await;
        store.set_seat_status(seats[1], SeatStatus::Booked).await;

        let intent = Uuid::new_v4();
        let held = manager
            .hold(intent, &seats, clock.now() + Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(held, 1);
        assert_eq!(store.seat(seats[0]).await.unwrap().held_by_intent_id, Some(intent));
    }

    #[tokio::test]
    async fn test_hold_all_rolls_back_on_shortfall() {
        let (store, clock, manager) = setup();
        let seats = store.add_seats(Uuid::new_v4(), &["1A", "1B"]).await;
        store.set_seat_status(seats[1], SeatStatus::Blocked).await;

        let err = manager
            .hold_all(Uuid::new_v4(), &seats, clock.now() + Duration::minutes(10))
            .await
            .unwrap_err();

        assert!(matches!(err, HoldError::SeatsUnavailable { requested: 2, acquired: 1 }));
        assert_eq!(store.seat(seats[0]).await.unwrap().held_by_intent_id, None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (store, clock, manager) = setup();
        let seats = store.add_seats(Uuid::new_v4(), &["3C"]).await;
        let intent = Uuid::new_v4();
        manager.hold(intent, &seats, clock.now() + Duration::minutes(10)).await.unwrap();

        assert_eq!(manager.release(intent).await.unwrap(), 1);
        assert_eq!(manager.release(intent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_availability_reevaluates_ttl() {
        let (store, clock, manager) = setup();
        let seats = store.add_seats(Uuid::new_v4(), &["4A", "4B"]).await;
        manager
            .hold(Uuid::new_v4(), &seats[..1], clock.now() + Duration::minutes(10))
            .await
            .unwrap();

        let before = manager.check_availability(&seats).await.unwrap();
        assert_eq!(before.available, vec![seats[1]]);
        assert_eq!(before.unavailable, vec![seats[0]]);

        clock.advance(Duration::minutes(11));
        let after = manager.check_availability(&seats).await.unwrap();
        assert!(after.all_available());
    }

    #[tokio::test]
    async fn test_duplicate_seat_ids_are_rejected() {
        let (_store, clock, manager) = setup();
        let seat = Uuid::new_v4();
        let err = manager
            .hold(Uuid::new_v4(), &[seat, seat], clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, HoldError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sweeps_clear_lapsed_and_orphaned_holds() {
        let (store, clock, manager) = setup();
        let seats = store.add_seats(Uuid::new_v4(), &["5A", "5B"]).await;
        // Neither intent exists in the store.
        store.force_seat_hold(seats[0], Uuid::new_v4(), clock.now() - Duration::seconds(1)).await;
        store.force_seat_hold(seats[1], Uuid::new_v4(), clock.now() + Duration::minutes(5)).await;

        assert_eq!(manager.sweep_expired().await.unwrap(), 1);
        assert_eq!(manager.sweep_orphaned().await.unwrap(), 1);
        assert_eq!(store.seat(seats[1]).await.unwrap().held_by_intent_id, None);
    }
}
