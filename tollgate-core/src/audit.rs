use crate::error::HoldError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    Initiated,
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentEventType::Initiated => "initiated",
            PaymentEventType::Pending => "pending",
            PaymentEventType::Succeeded => "succeeded",
            PaymentEventType::Failed => "failed",
            PaymentEventType::Cancelled => "cancelled",
        }
    }
}

impl FromStr for PaymentEventType {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentEventType::Initiated),
            "pending" => Ok(PaymentEventType::Pending),
            "succeeded" => Ok(PaymentEventType::Succeeded),
            "failed" => Ok(PaymentEventType::Failed),
            "cancelled" => Ok(PaymentEventType::Cancelled),
            other => Err(HoldError::Validation(format!("unknown payment event type: {other}"))),
        }
    }
}

/// An inbound payment event about to be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentAudit {
    pub intent_id: Uuid,
    pub payment_uid: String,
    pub event_type: PaymentEventType,
    pub expected_amount: i64,
    pub expected_currency: String,
    pub received_amount: i64,
    pub received_currency: String,
    pub idempotency_key: String,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
}

impl NewPaymentAudit {
    pub fn amounts_match(&self) -> bool {
        self.expected_amount == self.received_amount
            && self
                .expected_currency
                .eq_ignore_ascii_case(&self.received_currency)
    }

    /// Same delivery as `other` for duplicate detection.
    pub fn same_delivery(&self, other: &PaymentAudit) -> bool {
        self.payment_uid == other.payment_uid
            && self.event_type == other.event_type
            && self.idempotency_key == other.idempotency_key
    }

    pub fn into_record(self, id: Uuid, is_duplicate: bool, now: DateTime<Utc>) -> PaymentAudit {
        let amounts_match = self.amounts_match();
        PaymentAudit {
            id,
            intent_id: self.intent_id,
            payment_uid: self.payment_uid,
            event_type: self.event_type,
            expected_amount: self.expected_amount,
            expected_currency: self.expected_currency,
            received_amount: self.received_amount,
            received_currency: self.received_currency,
            amounts_match,
            idempotency_key: self.idempotency_key,
            is_duplicate,
            request_payload: self.request_payload,
            response_payload: self.response_payload,
            created_at: now,
        }
    }
}

/// Append-only audit row. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAudit {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub payment_uid: String,
    pub event_type: PaymentEventType,
    pub expected_amount: i64,
    pub expected_currency: String,
    pub received_amount: i64,
    pub received_currency: String,
    pub amounts_match: bool,
    pub idempotency_key: String,
    pub is_duplicate: bool,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
