use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use tollgate_core::audit::{NewPaymentAudit, PaymentAudit, PaymentEventType};
use tollgate_core::{HoldError, HoldResult};
use uuid::Uuid;

const AUDIT_COLUMNS: &str = "id, intent_id, payment_uid, event_type, expected_amount, \
     expected_currency, received_amount, received_currency, amounts_match, idempotency_key, \
     is_duplicate, request_payload, response_payload, created_at";

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    intent_id: Uuid,
    payment_uid: String,
    event_type: String,
    expected_amount: i64,
    expected_currency: String,
    received_amount: i64,
    received_currency: String,
    amounts_match: bool,
    idempotency_key: String,
    is_duplicate: bool,
    request_payload: Value,
    response_payload: Option<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for PaymentAudit {
    type Error = HoldError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(PaymentAudit {
            id: row.id,
            intent_id: row.intent_id,
            payment_uid: row.payment_uid,
            event_type: row.event_type.parse()?,
            expected_amount: row.expected_amount,
            expected_currency: row.expected_currency,
            received_amount: row.received_amount,
            received_currency: row.received_currency,
            amounts_match: row.amounts_match,
            idempotency_key: row.idempotency_key,
            is_duplicate: row.is_duplicate,
            request_payload: row.request_payload,
            response_payload: row.response_payload,
            created_at: row.created_at,
        })
    }
}

/// First delivery wins the partial unique index; repeats are stored flagged.
pub(crate) async fn append(
    conn: &mut PgConnection,
    new: NewPaymentAudit,
    now: DateTime<Utc>,
) -> HoldResult<PaymentAudit> {
    let first = insert(conn, &new, false, now).await?;
    if let Some(row) = first {
        return row.try_into();
    }

    insert(conn, &new, true, now)
        .await?
        .ok_or_else(|| HoldError::AuditWriteFailure("duplicate audit row was not stored".into()))?
        .try_into()
}

async fn insert(
    conn: &mut PgConnection,
    new: &NewPaymentAudit,
    is_duplicate: bool,
    now: DateTime<Utc>,
) -> HoldResult<Option<AuditRow>> {
    let sql = format!(
        r#"
        INSERT INTO payment_audits
            (id, intent_id, payment_uid, event_type, expected_amount, expected_currency,
             received_amount, received_currency, amounts_match, idempotency_key,
             is_duplicate, request_payload, response_payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (payment_uid, event_type, idempotency_key) WHERE NOT is_duplicate
        DO NOTHING
        RETURNING {AUDIT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, AuditRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(new.intent_id)
        .bind(&new.payment_uid)
        .bind(new.event_type.as_str())
        .bind(new.expected_amount)
        .bind(&new.expected_currency)
        .bind(new.received_amount)
        .bind(&new.received_currency)
        .bind(new.amounts_match())
        .bind(&new.idempotency_key)
        .bind(is_duplicate)
        .bind(&new.request_payload)
        .bind(&new.response_payload)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::AuditWriteFailure(e.to_string()))
}

pub(crate) async fn find(
    conn: &mut PgConnection,
    payment_uid: &str,
    event_type: PaymentEventType,
    idempotency_key: &str,
) -> HoldResult<Option<PaymentAudit>> {
    let sql = format!(
        r#"
        SELECT {AUDIT_COLUMNS} FROM payment_audits
        WHERE payment_uid = $1 AND event_type = $2 AND idempotency_key = $3 AND NOT is_duplicate
        "#
    );
    let row = sqlx::query_as::<_, AuditRow>(&sql)
        .bind(payment_uid)
        .bind(event_type.as_str())
        .bind(idempotency_key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("find_audit", e))?;

    row.map(PaymentAudit::try_from).transpose()
}

pub(crate) async fn for_intent(conn: &mut PgConnection, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>> {
    let sql = format!(
        "SELECT {AUDIT_COLUMNS} FROM payment_audits WHERE intent_id = $1 ORDER BY created_at, id"
    );
    let rows = sqlx::query_as::<_, AuditRow>(&sql)
        .bind(intent_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("audits_for_intent", e))?;

    rows.into_iter().map(PaymentAudit::try_from).collect()
}

pub(crate) async fn mismatches(conn: &mut PgConnection, limit: i64) -> HoldResult<Vec<PaymentAudit>> {
    let sql = format!(
        r#"
        SELECT {AUDIT_COLUMNS} FROM payment_audits
        WHERE NOT amounts_match AND NOT is_duplicate
        ORDER BY created_at DESC
        LIMIT $1
        "#
    );
    let rows = sqlx::query_as::<_, AuditRow>(&sql)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HoldError::persistence("amount_mismatches", e))?;

    rows.into_iter().map(PaymentAudit::try_from).collect()
}
