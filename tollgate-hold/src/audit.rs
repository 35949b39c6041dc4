use std::sync::Arc;
use tollgate_core::audit::{NewPaymentAudit, PaymentAudit, PaymentEventType};
use tollgate_core::{Clock, HoldError, HoldResult, HoldStore};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Append-only record of every payment event, first-delivery wins.
#[derive(Clone)]
pub struct PaymentAuditLog {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentAuditLog {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Durably append `event`.
    ///
    /// Any failure comes back as [`HoldError::AuditWriteFailure`]; it is never
    /// swallowed and must stop the caller from applying side effects.
    pub async fn log(&self, event: NewPaymentAudit) -> HoldResult<PaymentAudit> {
        let intent_id = event.intent_id;
        let payment_uid = event.payment_uid.clone();

        let record = match self.append(event).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    alert = "payment_audit",
                    %intent_id,
                    payment_uid = %payment_uid,
                    error = %e,
                    "Payment audit write failed"
                );
                return Err(match e {
                    HoldError::AuditWriteFailure(message) => HoldError::AuditWriteFailure(message),
                    other => HoldError::AuditWriteFailure(other.to_string()),
                });
            }
        };

        if record.is_duplicate {
            info!(%intent_id, payment_uid = %record.payment_uid, event = record.event_type.as_str(), "Duplicate payment event recorded");
        }
        if !record.amounts_match {
            warn!(
                %intent_id,
                payment_uid = %record.payment_uid,
                expected = record.expected_amount,
                received = record.received_amount,
                expected_currency = %record.expected_currency,
                received_currency = %record.received_currency,
                "Payment amount mismatch"
            );
        }
        Ok(record)
    }

    async fn append(&self, event: NewPaymentAudit) -> HoldResult<PaymentAudit> {
        let mut uow = self.store.begin().await?;
        let record = uow.append_audit(event, self.clock.now()).await?;
        uow.commit().await?;
        Ok(record)
    }

    /// True if this delivery has already been recorded once.
    pub async fn check_duplicate(
        &self,
        payment_uid: &str,
        event_type: PaymentEventType,
        idempotency_key: &str,
    ) -> HoldResult<bool> {
        Ok(self
            .store
            .find_audit(payment_uid, event_type, idempotency_key)
            .await?
            .is_some())
    }

    /// Most recent rows whose received amount or currency disagrees with the expected.
    pub async fn get_amount_mismatches(&self, limit: i64) -> HoldResult<Vec<PaymentAudit>> {
        self.store.amount_mismatches(limit).await
    }

    pub async fn history(&self, intent_id: Uuid) -> HoldResult<Vec<PaymentAudit>> {
        self.store.audits_for_intent(intent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use tollgate_core::lounge::{LoungeCapacityHold, LoungeOccupancy, TimeSlot};
    use tollgate_core::seat::TripSeat;
    use tollgate_core::{BookingIntent, SystemClock, UnitOfWork};
    use tollgate_store::MemoryHoldStore;

    fn event(uid: &str, received: i64) -> NewPaymentAudit {
        NewPaymentAudit {
            intent_id: Uuid::new_v4(),
            payment_uid: uid.to_string(),
            event_type: PaymentEventType::Succeeded,
            expected_amount: 5_000,
            expected_currency: "LKR".to_string(),
            received_amount: received,
            received_currency: "LKR".to_string(),
            idempotency_key: format!("{uid}:success"),
            request_payload: serde_json::json!({ "uid": uid }),
            response_payload: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_check_and_mismatch_report() {
        let log = PaymentAuditLog::new(Arc::new(MemoryHoldStore::new()), Arc::new(SystemClock));

        assert!(!log.check_duplicate("pay_1", PaymentEventType::Succeeded, "pay_1:success").await.unwrap());
        log.log(event("pay_1", 5_000)).await.unwrap();
        assert!(log.check_duplicate("pay_1", PaymentEventType::Succeeded, "pay_1:success").await.unwrap());
        assert!(!log.check_duplicate("pay_1", PaymentEventType::Failed, "pay_1:success").await.unwrap());

        log.log(event("pay_2", 4_000)).await.unwrap();
        let mismatches = log.get_amount_mismatches(10).await.unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].payment_uid, "pay_2");
    }

    /// Store whose transactions cannot be opened.
    struct BrokenStore;

    #[async_trait]
    impl HoldStore for BrokenStore {
        async fn begin(&self) -> HoldResult<Box<dyn UnitOfWork>> {
            Err(HoldError::persistence("begin", "connection refused"))
        }
        async fn get_intent(&self, _: Uuid) -> HoldResult<Option<BookingIntent>> { Ok(None) }
        async fn find_intent_by_key(&self, _: Uuid, _: &str) -> HoldResult<Option<BookingIntent>> { Ok(None) }
        async fn seats(&self, _: &[Uuid]) -> HoldResult<Vec<TripSeat>> { Ok(vec![]) }
        async fn lounge_capacity(&self, _: Uuid) -> HoldResult<Option<i32>> { Ok(None) }
        async fn lounge_occupancy(&self, _: Uuid, _: NaiveDate, _: TimeSlot, _: DateTime<Utc>) -> HoldResult<LoungeOccupancy> {
            Ok(LoungeOccupancy::default())
        }
        async fn lounge_holds_for_intent(&self, _: Uuid) -> HoldResult<Vec<LoungeCapacityHold>> { Ok(vec![]) }
        async fn expired_held_intents(&self, _: DateTime<Utc>, _: i64) -> HoldResult<Vec<Uuid>> { Ok(vec![]) }
        async fn payment_pending_timed_out(&self, _: DateTime<Utc>, _: i64) -> HoldResult<Vec<Uuid>> { Ok(vec![]) }
        async fn oldest_expired_held(&self, _: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> { Ok(None) }
        async fn oldest_timed_out_pending(&self, _: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> { Ok(None) }
        async fn confirming_timed_out(&self, _: DateTime<Utc>, _: i64) -> HoldResult<Vec<Uuid>> { Ok(vec![]) }
        async fn oldest_timed_out_confirming(&self, _: DateTime<Utc>) -> HoldResult<Option<DateTime<Utc>>> { Ok(None) }
        async fn find_audit(&self, _: &str, _: PaymentEventType, _: &str) -> HoldResult<Option<PaymentAudit>> { Ok(None) }
        async fn audits_for_intent(&self, _: Uuid) -> HoldResult<Vec<PaymentAudit>> { Ok(vec![]) }
        async fn amount_mismatches(&self, _: i64) -> HoldResult<Vec<PaymentAudit>> { Ok(vec![]) }
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced_as_audit_failure() {
        let log = PaymentAuditLog::new(Arc::new(BrokenStore), Arc::new(SystemClock));
        let err = log.log(event("pay_3", 5_000)).await.unwrap_err();
        assert!(matches!(err, HoldError::AuditWriteFailure(_)));
    }
}
