use crate::audit::PaymentEventType;
use crate::error::{HoldError, HoldResult};
use crate::intent::{BookingIntent, BookingLinks};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl GatewayPaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayPaymentStatus::Pending => "pending",
            GatewayPaymentStatus::Success => "success",
            GatewayPaymentStatus::Failed => "failed",
            GatewayPaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn event_type(self) -> PaymentEventType {
        match self {
            GatewayPaymentStatus::Pending => PaymentEventType::Pending,
            GatewayPaymentStatus::Success => PaymentEventType::Succeeded,
            GatewayPaymentStatus::Failed => PaymentEventType::Failed,
            GatewayPaymentStatus::Cancelled => PaymentEventType::Cancelled,
        }
    }
}

impl FromStr for GatewayPaymentStatus {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "processing" | "initiated" => Ok(GatewayPaymentStatus::Pending),
            "success" | "succeeded" | "completed" | "paid" => Ok(GatewayPaymentStatus::Success),
            "failed" | "failure" | "declined" => Ok(GatewayPaymentStatus::Failed),
            "cancelled" | "canceled" => Ok(GatewayPaymentStatus::Cancelled),
            other => Err(HoldError::Validation(format!("unknown payment status: {other}"))),
        }
    }
}

/// Inbound webhook body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub uid: String,
    pub invoice_id: String,
    pub payment_status: String,
    pub amount: i64,
    pub currency: String,
    /// Delivery token, when the gateway sends one.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl WebhookEvent {
    pub fn status(&self) -> HoldResult<GatewayPaymentStatus> {
        self.payment_status.parse()
    }

    /// The invoice id is the intent id handed to the gateway at initiation.
    pub fn intent_id(&self) -> HoldResult<Uuid> {
        Uuid::parse_str(&self.invoice_id)
            .map_err(|_| HoldError::Validation(format!("malformed invoice id: {}", self.invoice_id)))
    }

    pub fn delivery_key(&self) -> String {
        match &self.idempotency_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => format!("{}:{}", self.uid, self.payment_status.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentInitiation {
    pub gateway_reference: String,
    pub redirect_url: String,
}

/// Outbound half of the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Start a payment and return where to send the customer.
    async fn initiate(
        &self,
        amount: i64,
        currency: &str,
        reference: &str,
    ) -> Result<PaymentInitiation, Box<dyn std::error::Error + Send + Sync>>;
}

/// Creates the domain bookings (bus ticket, lounge passes) for a paid intent.
#[async_trait]
pub trait BookingWriter: Send + Sync {
    async fn create_bookings(
        &self,
        intent: &BookingIntent,
    ) -> Result<BookingLinks, Box<dyn std::error::Error + Send + Sync>>;
}
