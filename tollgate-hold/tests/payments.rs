mod common;

use chrono::Duration;
use common::{bus_request, CountingBookingWriter, FlakyStore, Harness};
use std::sync::Arc;
use tollgate_core::audit::PaymentEventType;
use tollgate_core::gateway::WebhookEvent;
use tollgate_core::seat::SeatStatus;
use tollgate_core::{BookingIntent, Clock, HoldError, IntentStatus};
use tollgate_hold::{MockPaymentGateway, PaymentOrchestrator, WebhookOutcome};
use tollgate_store::MemoryHoldStore;
use uuid::Uuid;

fn orchestrator(h: &Harness, writer: Arc<CountingBookingWriter>) -> PaymentOrchestrator {
    PaymentOrchestrator::new(
        h.intents.clone(),
        h.audit_log.clone(),
        Arc::new(MockPaymentGateway::new()),
        writer,
    )
}

fn webhook(intent: &BookingIntent, status: &str, amount: i64) -> WebhookEvent {
    WebhookEvent {
        uid: "pay_001".to_string(),
        invoice_id: intent.id.to_string(),
        payment_status: status.to_string(),
        amount,
        currency: "LKR".to_string(),
        idempotency_key: None,
    }
}

async fn pending_intent(h: &Harness, payments: &PaymentOrchestrator, seats: &[&str]) -> (BookingIntent, Vec<Uuid>) {
    let seat_ids = h.store.add_seats(Uuid::new_v4(), seats).await;
    let intent = h
        .intents
        .create(bus_request(Uuid::new_v4(), seat_ids.clone(), "checkout"))
        .await
        .unwrap();
    payments.initiate_payment(intent.id).await.unwrap();
    (h.intents.get(intent.id).await.unwrap(), seat_ids)
}

#[tokio::test]
async fn scenario_b_duplicate_webhook_applies_once() {
    let h = Harness::new();
    let writer = Arc::new(CountingBookingWriter::default());
    let payments = orchestrator(&h, writer.clone());
    let (intent, seats) = pending_intent(&h, &payments, &["1A", "1B"]).await;
    assert_eq!(intent.status, IntentStatus::PaymentPending);

    let event = webhook(&intent, "SUCCESS", intent.total_amount);
    let first = payments.handle_webhook(event.clone()).await.unwrap();
    let second = payments.handle_webhook(event).await.unwrap();

    assert!(matches!(first, WebhookOutcome::Confirmed(ref i) if i.status == IntentStatus::Confirmed));
    assert_eq!(second, WebhookOutcome::Duplicate);
    assert_eq!(writer.count(), 1);

    let succeeded: Vec<_> = h
        .audit_log
        .history(intent.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.event_type == PaymentEventType::Succeeded)
        .collect();
    assert_eq!(succeeded.len(), 2);
    assert_eq!(succeeded.iter().filter(|a| a.is_duplicate).count(), 1);
    assert_eq!(succeeded.iter().filter(|a| !a.is_duplicate).count(), 1);

    for seat in seats {
        assert_eq!(h.store.seat(seat).await.unwrap().status, SeatStatus::Booked);
    }
    let confirmed = h.intents.get(intent.id).await.unwrap();
    assert!(confirmed.bookings.bus_booking_id.is_some());
    assert_eq!(confirmed.payment.gateway_status.as_deref(), Some("success"));
}

#[tokio::test]
async fn initiate_writes_audit_and_extends_holds() {
    let h = Harness::new();
    let payments = orchestrator(&h, Arc::new(CountingBookingWriter::default()));
    let (intent, seats) = pending_intent(&h, &payments, &["2A"]).await;

    assert_eq!(intent.payment.gateway.as_deref(), Some("mock"));
    let reference = intent.payment.gateway_reference.clone().unwrap();
    let history = h.audit_log.history(intent.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, PaymentEventType::Initiated);
    assert_eq!(history[0].payment_uid, reference);

    let seat = h.store.seat(seats[0]).await.unwrap();
    assert_eq!(seat.held_until, intent.expires_at);

    let err = payments.initiate_payment(intent.id).await.unwrap_err();
    assert!(matches!(err, HoldError::WrongState { current: IntentStatus::PaymentPending, .. }));
}

#[tokio::test]
async fn gateway_failure_leaves_intent_held() {
    let h = Harness::new();
    let payments = PaymentOrchestrator::new(
        h.intents.clone(),
        h.audit_log.clone(),
        Arc::new(MockPaymentGateway::failing()),
        Arc::new(CountingBookingWriter::default()),
    );
    let seats = h.store.add_seats(Uuid::new_v4(), &["3A"]).await;
    let intent = h.intents.create(bus_request(Uuid::new_v4(), seats, "k")).await.unwrap();

    let err = payments.initiate_payment(intent.id).await.unwrap_err();
    assert!(matches!(err, HoldError::Gateway(_)));
    assert_eq!(h.intents.get(intent.id).await.unwrap().status, IntentStatus::Held);
}

#[tokio::test]
async fn amount_mismatch_fails_confirmation() {
    let h = Harness::new();
    let writer = Arc::new(CountingBookingWriter::default());
    let payments = orchestrator(&h, writer.clone());
    let (intent, seats) = pending_intent(&h, &payments, &["4A"]).await;

    let outcome = payments
        .handle_webhook(webhook(&intent, "success", intent.total_amount - 1))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::AmountMismatch);
    assert_eq!(writer.count(), 0);
    assert_eq!(h.intents.get(intent.id).await.unwrap().status, IntentStatus::ConfirmationFailed);
    assert_eq!(h.store.seat(seats[0]).await.unwrap().held_by_intent_id, None);
    let mismatches = h.audit_log.get_amount_mismatches(10).await.unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].intent_id, intent.id);
}

#[tokio::test]
async fn failed_payment_cancels_and_releases() {
    let h = Harness::new();
    let payments = orchestrator(&h, Arc::new(CountingBookingWriter::default()));
    let (intent, seats) = pending_intent(&h, &payments, &["5A", "5B"]).await;

    let outcome = payments
        .handle_webhook(webhook(&intent, "FAILED", intent.total_amount))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Cancelled);
    let stored = h.intents.get(intent.id).await.unwrap();
    assert_eq!(stored.status, IntentStatus::Cancelled);
    assert_eq!(stored.payment.gateway_status.as_deref(), Some("failed"));
    for seat in seats {
        assert_eq!(h.store.seat(seat).await.unwrap().held_by_intent_id, None);
    }
}

#[tokio::test]
async fn downstream_failure_marks_confirmation_failed() {
    let h = Harness::new();
    let writer = Arc::new(CountingBookingWriter::failing());
    let payments = orchestrator(&h, writer.clone());
    let (intent, _) = pending_intent(&h, &payments, &["6A"]).await;

    let outcome = payments
        .handle_webhook(webhook(&intent, "success", intent.total_amount))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::ConfirmationFailed);
    assert_eq!(writer.count(), 1);
    assert_eq!(h.intents.get(intent.id).await.unwrap().status, IntentStatus::ConfirmationFailed);
}

#[tokio::test]
async fn late_success_after_expiry_is_not_applied() {
    let h = Harness::new();
    let writer = Arc::new(CountingBookingWriter::default());
    let payments = orchestrator(&h, writer.clone());
    let (intent, _) = pending_intent(&h, &payments, &["7A"]).await;

    h.clock.advance(Duration::minutes(31));
    h.reaper.sweep_once().await.unwrap();

    let outcome = payments
        .handle_webhook(webhook(&intent, "success", intent.total_amount))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::AlreadySettled(IntentStatus::Expired));
    assert_eq!(writer.count(), 0);
}

#[tokio::test]
async fn pending_webhook_only_records_status() {
    let h = Harness::new();
    let payments = orchestrator(&h, Arc::new(CountingBookingWriter::default()));
    let (intent, _) = pending_intent(&h, &payments, &["8A"]).await;

    let outcome = payments
        .handle_webhook(webhook(&intent, "processing", intent.total_amount))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    let stored = h.intents.get(intent.id).await.unwrap();
    assert_eq!(stored.status, IntentStatus::PaymentPending);
    assert_eq!(stored.payment.gateway_status.as_deref(), Some("pending"));
}

#[tokio::test]
async fn unknown_invoice_is_rejected_before_auditing() {
    let h = Harness::new();
    let payments = orchestrator(&h, Arc::new(CountingBookingWriter::default()));
    let missing = Uuid::new_v4();

    let event = WebhookEvent {
        uid: "pay_x".into(),
        invoice_id: missing.to_string(),
        payment_status: "success".into(),
        amount: 100,
        currency: "LKR".into(),
        idempotency_key: None,
    };
    let err = payments.handle_webhook(event).await.unwrap_err();

    assert!(matches!(err, HoldError::NotFound { entity: "intent", .. }));
    assert!(h.audit_log.history(missing).await.unwrap().is_empty());
}

#[tokio::test]
async fn late_success_after_seat_was_resold_fails_confirmation() {
    let h = Harness::new();
    let writer = Arc::new(CountingBookingWriter::default());
    let payments = orchestrator(&h, writer.clone());
    let (first, seats) = pending_intent(&h, &payments, &["9A"]).await;

    // Past the payment deadline; the reaper has not run yet.
    h.clock.advance(Duration::minutes(31));
    let second = h
        .intents
        .create(bus_request(Uuid::new_v4(), seats.clone(), "second-checkout"))
        .await
        .unwrap();
    assert!(h.store.seat(seats[0]).await.unwrap().is_held_by(second.id, h.clock.now()));

    let outcome = payments
        .handle_webhook(webhook(&first, "success", first.total_amount))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::ConfirmationFailed);
    assert_eq!(writer.count(), 0);
    assert_eq!(h.intents.get(first.id).await.unwrap().status, IntentStatus::ConfirmationFailed);
    assert!(h.store.seat(seats[0]).await.unwrap().is_held_by(second.id, h.clock.now()));

    let confirmed = h.intents.confirm(second.id, Default::default()).await.unwrap();
    assert_eq!(confirmed.status, IntentStatus::Confirmed);
    assert_eq!(h.store.seat(seats[0]).await.unwrap().status, SeatStatus::Booked);
}

#[tokio::test]
async fn retried_webhook_completes_after_transient_failure() {
    let memory = MemoryHoldStore::new();
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let h = Harness::over(memory, flaky.clone());
    let writer = Arc::new(CountingBookingWriter::default());
    let payments = orchestrator(&h, writer.clone());
    let (intent, seats) = pending_intent(&h, &payments, &["10A"]).await;

    // The audit row commits, then the next unit of work fails.
    flaky.fail_begin_after(1);
    let event = webhook(&intent, "success", intent.total_amount);
    let err = payments.handle_webhook(event.clone()).await.unwrap_err();
    assert!(matches!(err, HoldError::Persistence { .. }));
    assert_eq!(h.intents.get(intent.id).await.unwrap().status, IntentStatus::PaymentPending);

    let retried = payments.handle_webhook(event.clone()).await.unwrap();
    assert!(matches!(retried, WebhookOutcome::Confirmed(ref i) if i.status == IntentStatus::Confirmed));
    assert_eq!(writer.count(), 1);
    assert_eq!(h.store.seat(seats[0]).await.unwrap().status, SeatStatus::Booked);

    let again = payments.handle_webhook(event).await.unwrap();
    assert_eq!(again, WebhookOutcome::Duplicate);
    assert_eq!(writer.count(), 1);
}

#[tokio::test]
async fn webhook_body_is_kept_in_the_audit_row() {
    let h = Harness::new();
    let payments = orchestrator(&h, Arc::new(CountingBookingWriter::default()));
    let (intent, _) = pending_intent(&h, &payments, &["11A"]).await;

    payments
        .handle_webhook(webhook(&intent, "processing", intent.total_amount))
        .await
        .unwrap();

    let history = h.audit_log.history(intent.id).await.unwrap();
    let pending = history
        .iter()
        .find(|a| a.event_type == PaymentEventType::Pending)
        .unwrap();
    assert_eq!(pending.request_payload["uid"], "pay_001");
    assert_eq!(pending.request_payload["invoiceId"], intent.id.to_string());
}
