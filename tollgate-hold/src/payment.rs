use crate::audit::PaymentAuditLog;
use crate::intent::BookingIntentStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tollgate_core::audit::{NewPaymentAudit, PaymentEventType};
use tollgate_core::gateway::{
    BookingWriter, GatewayPaymentStatus, PaymentGateway, PaymentInitiation, WebhookEvent,
};
use tollgate_core::{BookingIntent, HoldError, HoldResult, IntentStatus};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a webhook delivery ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Confirmed(BookingIntent),
    /// Already recorded once; no side effects applied.
    Duplicate,
    /// The intent had already left the state this event could act on.
    AlreadySettled(IntentStatus),
    AmountMismatch,
    ConfirmationFailed,
    Cancelled,
    Ignored,
}

pub struct PaymentOrchestrator {
    intents: BookingIntentStore,
    audit_log: PaymentAuditLog,
    gateway: Arc<dyn PaymentGateway>,
    bookings: Arc<dyn BookingWriter>,
}

impl PaymentOrchestrator {
    pub fn new(
        intents: BookingIntentStore,
        audit_log: PaymentAuditLog,
        gateway: Arc<dyn PaymentGateway>,
        bookings: Arc<dyn BookingWriter>,
    ) -> Self {
        Self {
            intents,
            audit_log,
            gateway,
            bookings,
        }
    }

    /// Start payment for a held intent and move it to `payment_pending`.
    pub async fn initiate_payment(&self, intent_id: Uuid) -> HoldResult<PaymentInitiation> {
        let intent = self.intents.get(intent_id).await?;
        if intent.status != IntentStatus::Held {
            return Err(HoldError::WrongState {
                id: intent_id,
                current: intent.status,
                target: IntentStatus::PaymentPending,
            });
        }

        let currency = intent.fare.currency.clone();
        let initiation = self
            .gateway
            .initiate(intent.total_amount, &currency, &intent.id.to_string())
            .await
            .map_err(|e| HoldError::Gateway(e.to_string()))?;

        let pending = self
            .intents
            .mark_payment_pending(intent_id, &initiation.gateway_reference, self.gateway.name())
            .await?;

        self.audit_log
            .log(NewPaymentAudit {
                intent_id,
                payment_uid: initiation.gateway_reference.clone(),
                event_type: PaymentEventType::Initiated,
                expected_amount: pending.total_amount,
                expected_currency: currency.clone(),
                received_amount: pending.total_amount,
                received_currency: currency.clone(),
                idempotency_key: format!("{}:initiated", initiation.gateway_reference),
                request_payload: json!({
                    "amount": pending.total_amount,
                    "currency": currency,
                    "reference": intent_id,
                    "gateway": self.gateway.name(),
                }),
                response_payload: serde_json::to_value(&initiation).ok(),
            })
            .await?;

        Ok(initiation)
    }

    /// Apply one gateway callback.
    ///
    /// The audit row is written before anything else; if that fails nothing
    /// happens and the error is returned so the gateway retries. A repeated
    /// delivery only short-circuits once the intent has settled: if an
    /// earlier attempt failed after its audit row committed, the retry drives
    /// the state machine again. Every step there is a guarded transition, so
    /// re-running it cannot apply the event twice.
    pub async fn handle_webhook(&self, event: WebhookEvent) -> HoldResult<WebhookOutcome> {
        let status = event.status()?;
        let intent_id = event.intent_id()?;
        let intent = self.intents.get(intent_id).await?;

        let audit = self
            .audit_log
            .log(NewPaymentAudit {
                intent_id,
                payment_uid: event.uid.clone(),
                event_type: status.event_type(),
                expected_amount: intent.total_amount,
                expected_currency: intent.fare.currency.clone(),
                received_amount: event.amount,
                received_currency: event.currency.clone(),
                idempotency_key: event.delivery_key(),
                request_payload: serde_json::to_value(&event).map_err(|e| {
                    HoldError::AuditWriteFailure(format!("webhook {} not serializable: {e}", event.uid))
                })?,
                response_payload: None,
            })
            .await?;

        if audit.is_duplicate {
            if intent.status.is_terminal() || status == GatewayPaymentStatus::Pending {
                return Ok(WebhookOutcome::Duplicate);
            }
            info!(%intent_id, payment_uid = %event.uid, status = %intent.status, "Repeated webhook for unsettled intent, re-applying");
        }

        match status {
            GatewayPaymentStatus::Pending => {
                self.intents.record_gateway_status(intent_id, status).await?;
                Ok(WebhookOutcome::Ignored)
            }
            GatewayPaymentStatus::Failed | GatewayPaymentStatus::Cancelled => {
                self.intents.record_gateway_status(intent_id, status).await?;
                settle(self.intents.cancel(intent_id).await, WebhookOutcome::Cancelled)
            }
            GatewayPaymentStatus::Success if !audit.amounts_match => {
                self.intents.record_gateway_status(intent_id, status).await?;
                let outcome = settle(
                    self.intents.mark_confirmation_failed(intent_id).await,
                    WebhookOutcome::AmountMismatch,
                )?;
                error!(alert = "payment_audit", %intent_id, payment_uid = %event.uid, "Paid amount does not match intent");
                Ok(outcome)
            }
            GatewayPaymentStatus::Success => self.complete(intent).await,
        }
    }

    async fn complete(&self, intent: BookingIntent) -> HoldResult<WebhookOutcome> {
        let intent_id = intent.id;
        self.intents.mark_payment_success(intent_id).await?;

        match self.intents.begin_confirmation(intent_id).await {
            Ok(_) => {}
            Err(HoldError::WrongState {
                current: IntentStatus::Confirming,
                ..
            }) => {
                // Another delivery owns the confirmation; the reaper fails it if it stalls.
                info!(%intent_id, "Confirmation already in progress");
                return Ok(WebhookOutcome::AlreadySettled(IntentStatus::Confirming));
            }
            Err(HoldError::WrongState { current, .. }) => {
                // Money arrived for an intent we already gave up on.
                error!(alert = "payment_audit", %intent_id, status = %current, "Payment received for settled intent");
                return Ok(WebhookOutcome::AlreadySettled(current));
            }
            Err(HoldError::HoldsLost { .. }) => return Ok(WebhookOutcome::ConfirmationFailed),
            Err(e) => return Err(e),
        }

        match self.bookings.create_bookings(&intent).await {
            Ok(links) => match self.intents.confirm(intent_id, links).await {
                Ok(confirmed) => Ok(WebhookOutcome::Confirmed(confirmed)),
                Err(HoldError::HoldsLost { .. }) => Ok(WebhookOutcome::ConfirmationFailed),
                Err(HoldError::WrongState { current, .. }) => {
                    // The confirmation deadline passed while bookings were being written.
                    error!(alert = "payment_audit", %intent_id, status = %current, "Bookings created for settled intent");
                    Ok(WebhookOutcome::AlreadySettled(current))
                }
                Err(e) => Err(e),
            },
            Err(e) => {
                error!(%intent_id, error = %e, "Downstream booking creation failed");
                self.intents.mark_confirmation_failed(intent_id).await?;
                Ok(WebhookOutcome::ConfirmationFailed)
            }
        }
    }
}

fn settle(result: HoldResult<BookingIntent>, done: WebhookOutcome) -> HoldResult<WebhookOutcome> {
    match result {
        Ok(_) => Ok(done),
        Err(HoldError::WrongState { current, .. }) => {
            info!(status = %current, "Webhook for already settled intent");
            Ok(WebhookOutcome::AlreadySettled(current))
        }
        Err(e) => Err(e),
    }
}

/// Gateway stand-in for development and tests.
pub struct MockPaymentGateway {
    fail: bool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self { fail: false }
    }

    /// Every `initiate` call errors.
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initiate(
        &self,
        amount: i64,
        currency: &str,
        reference: &str,
    ) -> Result<PaymentInitiation, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("Simulated payment gateway failure".into());
        }
        let gateway_reference = format!("mock_pay_{}", reference.replace('-', ""));
        warn!(amount, currency, reference, "Mock gateway in use, no money will move");
        Ok(PaymentInitiation {
            redirect_url: format!("https://pay.mock.invalid/checkout/{gateway_reference}"),
            gateway_reference,
        })
    }
}
