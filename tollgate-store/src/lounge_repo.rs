use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgConnection;
use tollgate_core::lounge::{LoungeCapacityHold, LoungeOccupancy, NewLoungeHold, TimeSlot};
use tollgate_core::{HoldError, HoldResult};
use uuid::Uuid;

const HOLD_COLUMNS: &str = "id, lounge_id, intent_id, hold_date, slot_start, slot_end, guests, \
     held_until, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct LoungeHoldRow {
    id: Uuid,
    lounge_id: Uuid,
    intent_id: Uuid,
    hold_date: NaiveDate,
    slot_start: NaiveTime,
    slot_end: NaiveTime,
    guests: i32,
    held_until: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoungeHoldRow> for LoungeCapacityHold {
    type Error = HoldError;

    fn try_from(row: LoungeHoldRow) -> Result<Self, Self::Error> {
        Ok(LoungeCapacityHold {
            id: row.id,
            lounge_id: row.lounge_id,
            intent_id: row.intent_id,
            date: row.hold_date,
            slot: TimeSlot { start: row.slot_start, end: row.slot_end },
            guests: row.guests,
            held_until: row.held_until,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) async fn capacity(conn: &mut PgConnection, lounge_id: Uuid) -> HoldResult<Option<i32>> {
    sqlx::query_scalar("SELECT max_capacity FROM lounges WHERE id = $1")
        .bind(lounge_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("lounge_capacity", e))
}

/// Row lock on the lounge; concurrent reservations for it queue behind us.
pub(crate) async fn lock(conn: &mut PgConnection, lounge_id: Uuid) -> HoldResult<Option<i32>> {
    sqlx::query_scalar("SELECT max_capacity FROM lounges WHERE id = $1 FOR UPDATE")
        .bind(lounge_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("lock_lounge", e))
}

pub(crate) async fn occupancy(
    conn: &mut PgConnection,
    lounge_id: Uuid,
    date: NaiveDate,
    slot: TimeSlot,
    now: DateTime<Utc>,
) -> HoldResult<LoungeOccupancy> {
    let (confirmed_guests, held_guests): (i32, i32) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(guests) FILTER (WHERE status = 'confirmed'), 0)::INT4,
            COALESCE(SUM(guests) FILTER (WHERE status = 'held' AND held_until >= $5), 0)::INT4
        FROM lounge_capacity_holds
        WHERE lounge_id = $1
          AND hold_date = $2
          AND slot_start < $4
          AND $3 < slot_end
        "#,
    )
    .bind(lounge_id)
    .bind(date)
    .bind(slot.start)
    .bind(slot.end)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("lounge_occupancy", e))?;

    Ok(LoungeOccupancy { confirmed_guests, held_guests })
}

pub(crate) async fn insert(
    conn: &mut PgConnection,
    new: NewLoungeHold,
    now: DateTime<Utc>,
) -> HoldResult<LoungeCapacityHold> {
    new.validate()?;
    let hold = new.into_hold(Uuid::new_v4(), now);

    let sql = format!(
        r#"
        INSERT INTO lounge_capacity_holds
            (id, lounge_id, intent_id, hold_date, slot_start, slot_end, guests,
             held_until, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        RETURNING {HOLD_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, LoungeHoldRow>(&sql)
        .bind(hold.id)
        .bind(hold.lounge_id)
        .bind(hold.intent_id)
        .bind(hold.date)
        .bind(hold.slot.start)
        .bind(hold.slot.end)
        .bind(hold.guests)
        .bind(hold.held_until)
        .bind(hold.status.as_str())
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("insert_lounge_hold", e))?;

    row.try_into()
}

pub(crate) async fn for_intent(
    conn: &mut PgConnection,
    intent_id: Uuid,
) -> HoldResult<Vec<LoungeCapacityHold>> {
    let sql = format!(
        "SELECT {HOLD_COLUMNS} FROM lounge_capacity_holds WHERE intent_id = $1 ORDER BY created_at"
    );
    let rows = sqlx::query_as::<_, LoungeHoldRow>(&sql)
        .bind(intent_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("lounge_holds_for_intent", e))?;

    rows.into_iter().map(LoungeCapacityHold::try_from).collect()
}

pub(crate) async fn extend(
    conn: &mut PgConnection,
    intent_id: Uuid,
    held_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE lounge_capacity_holds SET held_until = $2, updated_at = $3
        WHERE intent_id = $1 AND status = 'held' AND held_until >= $3
        "#,
    )
    .bind(intent_id)
    .bind(held_until)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("extend_lounge_holds", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn release(
    conn: &mut PgConnection,
    intent_id: Uuid,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE lounge_capacity_holds SET status = 'released', updated_at = $2
        WHERE intent_id = $1 AND status = 'held'
        "#,
    )
    .bind(intent_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("release_lounge_holds", e))?;

    Ok(result.rows_affected())
}

/// Only live rows are confirmed; a lapsed row's guests are no longer counted
/// against capacity and may have been resold.
pub(crate) async fn confirm(
    conn: &mut PgConnection,
    intent_id: Uuid,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE lounge_capacity_holds SET status = 'confirmed', updated_at = $2
        WHERE intent_id = $1 AND status = 'held' AND held_until >= $2
        "#,
    )
    .bind(intent_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("confirm_lounge_holds", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn sweep_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> HoldResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE lounge_capacity_holds h SET status = 'released', updated_at = $1
        WHERE h.status = 'held'
          AND h.held_until < $1
          AND NOT EXISTS (
              SELECT 1 FROM booking_intents i
              WHERE i.id = h.intent_id AND i.status = 'confirming'
          )
        "#,
    )
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("sweep_expired_lounge_holds", e))?;

    Ok(result.rows_affected())
}
