use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgConnection;
use tollgate_core::intent::{
    BookingIntent, BookingLinks, FareBreakdown, IntentPayload, IntentTransition, NewIntent,
    PaymentLink, PricingSnapshot,
};
use tollgate_core::repository::InsertedIntent;
use tollgate_core::{HoldError, HoldResult, IntentStatus};
use uuid::Uuid;

const INTENT_COLUMNS: &str = "id, user_id, kind, status, payload, fare, total_amount, pricing, \
     gateway_reference, gateway_status, gateway_name, bus_booking_id, \
     pre_trip_lounge_booking_id, post_trip_lounge_booking_id, idempotency_key, expires_at, \
     payment_initiated_at, confirmed_at, expired_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct IntentRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    status: String,
    payload: Json<IntentPayload>,
    fare: Json<FareBreakdown>,
    total_amount: i64,
    pricing: Json<PricingSnapshot>,
    gateway_reference: Option<String>,
    gateway_status: Option<String>,
    gateway_name: Option<String>,
    bus_booking_id: Option<Uuid>,
    pre_trip_lounge_booking_id: Option<Uuid>,
    post_trip_lounge_booking_id: Option<Uuid>,
    idempotency_key: String,
    expires_at: Option<DateTime<Utc>>,
    payment_initiated_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for BookingIntent {
    type Error = HoldError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(BookingIntent {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            payload: row.payload.0,
            fare: row.fare.0,
            total_amount: row.total_amount,
            pricing: row.pricing.0,
            payment: PaymentLink {
                gateway_reference: row.gateway_reference,
                gateway_status: row.gateway_status,
                gateway: row.gateway_name,
            },
            bookings: BookingLinks {
                bus_booking_id: row.bus_booking_id,
                pre_trip_lounge_booking_id: row.pre_trip_lounge_booking_id,
                post_trip_lounge_booking_id: row.post_trip_lounge_booking_id,
            },
            idempotency_key: row.idempotency_key,
            expires_at: row.expires_at,
            payment_initiated_at: row.payment_initiated_at,
            confirmed_at: row.confirmed_at,
            expired_at: row.expired_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column values a transition writes. `None` leaves the stored value alone,
/// except `expires_at` which is always overwritten.
#[derive(Default)]
struct TransitionColumns {
    expires_at: Option<DateTime<Utc>>,
    gateway_reference: Option<String>,
    gateway_name: Option<String>,
    payment_initiated_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    links: BookingLinks,
}

impl TransitionColumns {
    fn from_transition(transition: &IntentTransition, now: DateTime<Utc>) -> Self {
        match transition {
            IntentTransition::PaymentPending { reference, gateway, expires_at } => Self {
                expires_at: Some(*expires_at),
                gateway_reference: Some(reference.clone()),
                gateway_name: Some(gateway.clone()),
                payment_initiated_at: Some(now),
                ..Self::default()
            },
            IntentTransition::Confirmed(links) => Self {
                confirmed_at: Some(now),
                links: links.clone(),
                ..Self::default()
            },
            IntentTransition::Confirming { expires_at } => {
                Self { expires_at: Some(*expires_at), ..Self::default() }
            }
            IntentTransition::Expired => Self { expired_at: Some(now), ..Self::default() },
            IntentTransition::Cancelled | IntentTransition::ConfirmationFailed => Self::default(),
        }
    }
}

fn status_strings(statuses: &[IntentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub(crate) async fn get(conn: &mut PgConnection, id: Uuid) -> HoldResult<Option<BookingIntent>> {
    let sql = format!("SELECT {INTENT_COLUMNS} FROM booking_intents WHERE id = $1");
    let row = sqlx::query_as::<_, IntentRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("get_intent", e))?;

    row.map(BookingIntent::try_from).transpose()
}

pub(crate) async fn find_by_key(
    conn: &mut PgConnection,
    user_id: Uuid,
    idempotency_key: &str,
) -> HoldResult<Option<BookingIntent>> {
    let sql = format!(
        "SELECT {INTENT_COLUMNS} FROM booking_intents WHERE user_id = $1 AND idempotency_key = $2"
    );
    let row = sqlx::query_as::<_, IntentRow>(&sql)
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("find_intent_by_key", e))?;

    row.map(BookingIntent::try_from).transpose()
}

pub(crate) async fn insert(
    conn: &mut PgConnection,
    new: NewIntent,
    now: DateTime<Utc>,
) -> HoldResult<InsertedIntent> {
    let kind = new.validate()?;
    let user_id = new.user_id;
    let key = new.idempotency_key.clone();
    let intent = new.into_intent(Uuid::new_v4(), kind, now);

    let sql = format!(
        r#"
        INSERT INTO booking_intents
            (id, user_id, kind, status, payload, fare, total_amount, pricing,
             idempotency_key, expires_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        ON CONFLICT (user_id, idempotency_key) DO NOTHING
        RETURNING {INTENT_COLUMNS}
        "#
    );
    let inserted = sqlx::query_as::<_, IntentRow>(&sql)
        .bind(intent.id)
        .bind(intent.user_id)
        .bind(intent.kind.as_str())
        .bind(intent.status.as_str())
        .bind(Json(&intent.payload))
        .bind(Json(&intent.fare))
        .bind(intent.total_amount)
        .bind(Json(&intent.pricing))
        .bind(&intent.idempotency_key)
        .bind(intent.expires_at)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("insert_intent", e))?;

    if let Some(row) = inserted {
        return Ok(InsertedIntent { intent: row.try_into()?, created: true });
    }

    let existing = find_by_key(conn, user_id, &key)
        .await?
        .ok_or_else(|| HoldError::persistence("insert_intent", "conflicting row vanished"))?;
    Ok(InsertedIntent { intent: existing, created: false })
}

pub(crate) async fn transition(
    conn: &mut PgConnection,
    id: Uuid,
    transition: &IntentTransition,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let cols = TransitionColumns::from_transition(transition, now);

    let result = sqlx::query(
        r#"
        UPDATE booking_intents SET
            status = $2,
            updated_at = $3,
            expires_at = $4,
            gateway_reference = COALESCE($5, gateway_reference),
            gateway_name = COALESCE($6, gateway_name),
            payment_initiated_at = COALESCE($7, payment_initiated_at),
            confirmed_at = COALESCE($8, confirmed_at),
            expired_at = COALESCE($9, expired_at),
            bus_booking_id = COALESCE($10, bus_booking_id),
            pre_trip_lounge_booking_id = COALESCE($11, pre_trip_lounge_booking_id),
            post_trip_lounge_booking_id = COALESCE($12, post_trip_lounge_booking_id)
        WHERE id = $1 AND status = ANY($13)
        "#,
    )
    .bind(id)
    .bind(transition.target().as_str())
    .bind(now)
    .bind(cols.expires_at)
    .bind(cols.gateway_reference)
    .bind(cols.gateway_name)
    .bind(cols.payment_initiated_at)
    .bind(cols.confirmed_at)
    .bind(cols.expired_at)
    .bind(cols.links.bus_booking_id)
    .bind(cols.links.pre_trip_lounge_booking_id)
    .bind(cols.links.post_trip_lounge_booking_id)
    .bind(status_strings(&transition.sources()))
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("transition_intent", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn status(conn: &mut PgConnection, id: Uuid) -> HoldResult<Option<IntentStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM booking_intents WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| HoldError::persistence("intent_status", e))?;

    status.map(|s| s.parse()).transpose()
}

pub(crate) async fn set_gateway_status(
    conn: &mut PgConnection,
    id: Uuid,
    gateway_status: &str,
    now: DateTime<Utc>,
) -> HoldResult<u64> {
    let result = sqlx::query(
        "UPDATE booking_intents SET gateway_status = $2, updated_at = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(gateway_status)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("set_gateway_status", e))?;

    Ok(result.rows_affected())
}

pub(crate) async fn expired_held(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> HoldResult<Vec<Uuid>> {
    sqlx::query_scalar(
        r#"
        SELECT id FROM booking_intents
        WHERE status = 'held' AND expires_at < $1
        ORDER BY expires_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("expired_held_intents", e))
}

pub(crate) async fn pending_timed_out(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> HoldResult<Vec<Uuid>> {
    sqlx::query_scalar(
        r#"
        SELECT id FROM booking_intents
        WHERE status = 'payment_pending' AND payment_initiated_at < $1
        ORDER BY payment_initiated_at
        LIMIT $2
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("payment_pending_timed_out", e))
}

pub(crate) async fn oldest_expired_held(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> HoldResult<Option<DateTime<Utc>>> {
    sqlx::query_scalar(
        "SELECT MIN(expires_at) FROM booking_intents WHERE status = 'held' AND expires_at < $1",
    )
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("oldest_expired_held", e))
}

pub(crate) async fn oldest_timed_out_pending(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> HoldResult<Option<DateTime<Utc>>> {
    sqlx::query_scalar(
        r#"
        SELECT MIN(payment_initiated_at) FROM booking_intents
        WHERE status = 'payment_pending' AND payment_initiated_at < $1
        "#,
    )
    .bind(cutoff)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("oldest_timed_out_pending", e))
}

pub(crate) async fn confirming_timed_out(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> HoldResult<Vec<Uuid>> {
    sqlx::query_scalar(
        r#"
        SELECT id FROM booking_intents
        WHERE status = 'confirming' AND expires_at < $1
        ORDER BY expires_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("confirming_timed_out", e))
}

pub(crate) async fn oldest_timed_out_confirming(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> HoldResult<Option<DateTime<Utc>>> {
    sqlx::query_scalar(
        "SELECT MIN(expires_at) FROM booking_intents WHERE status = 'confirming' AND expires_at < $1",
    )
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| HoldError::persistence("oldest_timed_out_confirming", e))
}
