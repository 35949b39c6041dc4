use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tollgate_core::seat::TripSeat;
use tollgate_core::{HoldError, HoldResult};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    trip_id: Uuid,
    seat_number: String,
    status: String,
    held_by_intent_id: Option<Uuid>,
    held_until: Option<DateTime<Utc>>,
}

impl TryFrom<SeatRow> for TripSeat {
    type Error = HoldError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(TripSeat {
            id: row.id,
            trip_id: row.trip_id,
            seat_number: row.seat_number,
            status: row.status.parse()?,
            held_by_intent_id: row.held_by_intent_id,
            held_until: row.held_until,
        })
    }
}

pub(crate) async fn fetch(conn: &mut PgConnection, seat_ids: &[Uuid]) -> HoldResult<Vec<TripSeat>> {
    let rows = sqlx::query_as::<_, SeatRow>(
        r#"
        SELECT id, trip_id, seat_number, status, held_by_intent_id, held_until
        FROM trip_seats
        WHERE id = ANY($1)
        "#,
    )
    .bind(seat_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("fetch_seats", e))?;

    rows.into_iter().map(TripSeat::try_from).collect()
}

/// Conditional update; rows already held by someone else fail the predicate
/// after the row lock is released, so a seat is never held twice. The owning
/// intent may re-hold to refresh its deadline.
pub(crate) async fn hold(
    conn: &mut PgConnection,
    intent_id: Uuid,
    seat_ids: &[Uuid],
    held_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE trip_seats
        SET held_by_intent_id = $1, held_until = $2
        WHERE id = ANY($3)
          AND status = 'available'
          AND (held_by_intent_id IS NULL OR held_until < $4 OR held_by_intent_id = $1)
        "#,
    )
    .bind(intent_id)
    .bind(held_until)
    .bind(seat_ids)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("hold_seats", e))?;

    Ok(result.rows_affected())
}

/// Lapsed holds are not revived; another intent may already have taken the seat.
pub(crate) async fn extend(
    conn: &mut PgConnection,
    intent_id: Uuid,
    held_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE trip_seats SET held_until = $2
        WHERE held_by_intent_id = $1 AND status = 'available' AND held_until >= $3
        "#,
    )
    .bind(intent_id)
    .bind(held_until)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("extend_seat_holds", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn release(conn: &mut PgConnection, intent_id: Uuid) -> HoldResult<u64> {
    let result = sqlx::query(
        "UPDATE trip_seats SET held_by_intent_id = NULL, held_until = NULL WHERE held_by_intent_id = $1",
    )
    .bind(intent_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("release_seats", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn book(
    conn: &mut PgConnection,
    intent_id: Uuid,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE trip_seats
        SET status = 'booked', held_by_intent_id = NULL, held_until = NULL
        WHERE held_by_intent_id = $1 AND status = 'available' AND held_until >= $2
        "#,
    )
    .bind(intent_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("book_seats", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn sweep_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE trip_seats s SET held_by_intent_id = NULL, held_until = NULL
        WHERE s.held_by_intent_id IS NOT NULL
          AND s.held_until < $1
          AND NOT EXISTS (
              SELECT 1 FROM booking_intents i
              WHERE i.id = s.held_by_intent_id AND i.status = 'confirming'
          )
        "#,
    )
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("sweep_expired_seat_holds", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn sweep_orphaned(conn: &mut PgConnection) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE trip_seats s SET held_by_intent_id = NULL, held_until = NULL
        WHERE s.held_by_intent_id IS NOT NULL
          AND NOT EXISTS (SELECT 1 FROM booking_intents i WHERE i.id = s.held_by_intent_id)
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("sweep_orphaned_seat_holds", e))?;

    Ok(result.rows_affected())
}
