use crate::error::{HoldError, HoldResult};
use crate::lounge::TimeSlot;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Booking intent status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Held,
    PaymentPending,
    Confirming,
    Confirmed,
    Cancelled,
    Expired,
    ConfirmationFailed,
}

impl IntentStatus {
    pub const ALL: [IntentStatus; 7] = [
        IntentStatus::Held,
        IntentStatus::PaymentPending,
        IntentStatus::Confirming,
        IntentStatus::Confirmed,
        IntentStatus::Cancelled,
        IntentStatus::Expired,
        IntentStatus::ConfirmationFailed,
    ];

    /// The transition table. A move not listed here is rejected.
    pub fn allowed_targets(self) -> &'static [IntentStatus] {
        use IntentStatus::*;
        match self {
            Held => &[
                PaymentPending,
                Confirming,
                Confirmed,
                Cancelled,
                Expired,
                ConfirmationFailed,
            ],
            PaymentPending => &[Confirming, Confirmed, Cancelled, Expired, ConfirmationFailed],
            Confirming => &[Confirmed, ConfirmationFailed],
            Confirmed | Cancelled | Expired | ConfirmationFailed => &[],
        }
    }

    pub fn can_transition_to(self, target: IntentStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Every status from which `target` may be reached.
    pub fn allowed_sources(target: IntentStatus) -> Vec<IntentStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// The intent owns seats or lounge capacity; `expires_at` is only
    /// meaningful in these states.
    pub fn holds_inventory(self) -> bool {
        matches!(
            self,
            IntentStatus::Held | IntentStatus::PaymentPending | IntentStatus::Confirming
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Held => "held",
            IntentStatus::PaymentPending => "payment_pending",
            IntentStatus::Confirming => "confirming",
            IntentStatus::Confirmed => "confirmed",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Expired => "expired",
            IntentStatus::ConfirmationFailed => "confirmation_failed",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| HoldError::Validation(format!("unknown intent status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Bus,
    Lounge,
    Combo,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Bus => "bus",
            IntentKind::Lounge => "lounge",
            IntentKind::Combo => "combo",
        }
    }
}

impl FromStr for IntentKind {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bus" => Ok(IntentKind::Bus),
            "lounge" => Ok(IntentKind::Lounge),
            "combo" => Ok(IntentKind::Combo),
            other => Err(HoldError::Validation(format!("unknown intent kind: {other}"))),
        }
    }
}

/// Snapshot of the bus leg as it was requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusLeg {
    pub trip_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub boarding_point: Option<String>,
    pub dropping_point: Option<String>,
    #[serde(default)]
    pub passenger_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoungePosition {
    PreTrip,
    PostTrip,
}

/// Snapshot of one lounge visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoungeLeg {
    pub lounge_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub guests: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentPayload {
    pub bus: Option<BusLeg>,
    pub pre_trip_lounge: Option<LoungeLeg>,
    pub post_trip_lounge: Option<LoungeLeg>,
}

impl IntentPayload {
    /// Check the payload shape and derive the intent kind from it.
    pub fn validate(&self) -> HoldResult<IntentKind> {
        if let Some(bus) = &self.bus {
            crate::seat::validate_seat_ids(&bus.seat_ids)?;
        }

        for (_, leg) in self.lounge_legs() {
            leg.slot.validate()?;
            if leg.guests <= 0 {
                return Err(HoldError::Validation(format!(
                    "guest count must be positive, got {}",
                    leg.guests
                )));
            }
        }

        let has_lounge = self.pre_trip_lounge.is_some() || self.post_trip_lounge.is_some();
        match (self.bus.is_some(), has_lounge) {
            (true, true) => Ok(IntentKind::Combo),
            (true, false) => Ok(IntentKind::Bus),
            (false, true) => Ok(IntentKind::Lounge),
            (false, false) => Err(HoldError::Validation(
                "intent must contain a bus leg or a lounge leg".to_string(),
            )),
        }
    }

    pub fn lounge_legs(&self) -> impl Iterator<Item = (LoungePosition, &LoungeLeg)> {
        self.pre_trip_lounge
            .iter()
            .map(|leg| (LoungePosition::PreTrip, leg))
            .chain(
                self.post_trip_lounge
                    .iter()
                    .map(|leg| (LoungePosition::PostTrip, leg)),
            )
    }

    pub fn seat_ids(&self) -> &[Uuid] {
        self.bus.as_ref().map(|b| b.seat_ids.as_slice()).unwrap_or(&[])
    }
}

/// Fare breakdown in minor currency units.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FareBreakdown {
    pub currency: String,
    pub bus_fare: i64,
    pub pre_trip_lounge_fare: i64,
    pub post_trip_lounge_fare: i64,
    pub taxes: i64,
    pub fees: i64,
    pub discount: i64,
}

impl FareBreakdown {
    pub fn total(&self) -> i64 {
        self.bus_fare + self.pre_trip_lounge_fare + self.post_trip_lounge_fare + self.taxes
            + self.fees
            - self.discount
    }

    pub fn validate(&self) -> HoldResult<()> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(HoldError::Validation(format!(
                "invalid currency code: {}",
                self.currency
            )));
        }
        let parts = [
            self.bus_fare,
            self.pre_trip_lounge_fare,
            self.post_trip_lounge_fare,
            self.taxes,
            self.fees,
            self.discount,
        ];
        if parts.iter().any(|p| *p < 0) || self.total() < 0 {
            return Err(HoldError::Validation("fare components must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Prices captured when the hold was taken. Never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingSnapshot {
    pub captured_at: DateTime<Utc>,
    pub currency: String,
    pub seat_unit_price: i64,
    pub lounge_guest_unit_price: i64,
    pub tax_rate: f64,
    #[serde(default)]
    pub rules: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentLink {
    pub gateway_reference: Option<String>,
    pub gateway_status: Option<String>,
    pub gateway: Option<String>,
}

/// Domain bookings created once the intent is confirmed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingLinks {
    pub bus_booking_id: Option<Uuid>,
    pub pre_trip_lounge_booking_id: Option<Uuid>,
    pub post_trip_lounge_booking_id: Option<Uuid>,
}

/// One purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: IntentKind,
    pub status: IntentStatus,
    pub payload: IntentPayload,
    pub fare: FareBreakdown,
    pub total_amount: i64,
    pub pricing: PricingSnapshot,
    pub payment: PaymentLink,
    pub bookings: BookingLinks,
    pub idempotency_key: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub payment_initiated_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingIntent {
    /// True when the intent still claims inventory but its deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.holds_inventory() && self.expires_at.is_some_and(|t| t < now)
    }
}

/// Everything needed to insert a fresh intent.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub user_id: Uuid,
    pub payload: IntentPayload,
    pub fare: FareBreakdown,
    pub pricing: PricingSnapshot,
    pub idempotency_key: String,
    pub expires_at: DateTime<Utc>,
}

impl NewIntent {
    pub fn validate(&self) -> HoldResult<IntentKind> {
        let key = self.idempotency_key.trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(HoldError::Validation(format!(
                "idempotency key must be 1..={MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        self.fare.validate()?;
        self.payload.validate()
    }

    pub fn into_intent(self, id: Uuid, kind: IntentKind, now: DateTime<Utc>) -> BookingIntent {
        let total_amount = self.fare.total();
        BookingIntent {
            id,
            user_id: self.user_id,
            kind,
            status: IntentStatus::Held,
            payload: self.payload,
            fare: self.fare,
            total_amount,
            pricing: self.pricing,
            payment: PaymentLink::default(),
            bookings: BookingLinks::default(),
            idempotency_key: self.idempotency_key,
            expires_at: Some(self.expires_at),
            payment_initiated_at: None,
            confirmed_at: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A status change together with the columns it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentTransition {
    PaymentPending {
        reference: String,
        gateway: String,
        expires_at: DateTime<Utc>,
    },
    /// Downstream bookings are being written; the holds last until `expires_at`.
    Confirming {
        expires_at: DateTime<Utc>,
    },
    Confirmed(BookingLinks),
    Cancelled,
    Expired,
    ConfirmationFailed,
}

impl IntentTransition {
    pub fn target(&self) -> IntentStatus {
        match self {
            IntentTransition::PaymentPending { .. } => IntentStatus::PaymentPending,
            IntentTransition::Confirming { .. } => IntentStatus::Confirming,
            IntentTransition::Confirmed(_) => IntentStatus::Confirmed,
            IntentTransition::Cancelled => IntentStatus::Cancelled,
            IntentTransition::Expired => IntentStatus::Expired,
            IntentTransition::ConfirmationFailed => IntentStatus::ConfirmationFailed,
        }
    }

    /// Statuses the conditional update may match.
    pub fn sources(&self) -> Vec<IntentStatus> {
        IntentStatus::allowed_sources(self.target())
    }

    /// Apply to an in-memory row. Callers must have checked `sources()` first.
    pub fn apply(&self, intent: &mut BookingIntent, now: DateTime<Utc>) {
        intent.status = self.target();
        intent.updated_at = now;

        match self {
            IntentTransition::PaymentPending {
                reference,
                gateway,
                expires_at,
            } => {
                intent.payment.gateway_reference = Some(reference.clone());
                intent.payment.gateway = Some(gateway.clone());
                intent.payment_initiated_at = Some(now);
                intent.expires_at = Some(*expires_at);
            }
            IntentTransition::Confirming { expires_at } => {
                intent.expires_at = Some(*expires_at);
            }
            IntentTransition::Confirmed(links) => {
                intent.bookings = links.clone();
                intent.confirmed_at = Some(now);
            }
            IntentTransition::Expired => {
                intent.expired_at = Some(now);
            }
            IntentTransition::Cancelled | IntentTransition::ConfirmationFailed => {}
        }

        if !intent.status.holds_inventory() {
            intent.expires_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};

    fn slot(start: u32, end: u32) -> TimeSlot {
        TimeSlot::new(
            NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn new_intent(payload: IntentPayload) -> NewIntent {
        let now = Utc::now();
        NewIntent {
            user_id: Uuid::new_v4(),
            payload,
            fare: FareBreakdown {
                currency: "INR".to_string(),
                bus_fare: 120_000,
                taxes: 6_000,
                fees: 1_500,
                discount: 500,
                ..Default::default()
            },
            pricing: PricingSnapshot {
                captured_at: now,
                currency: "INR".to_string(),
                seat_unit_price: 60_000,
                lounge_guest_unit_price: 0,
                tax_rate: 0.05,
                rules: serde_json::json!({}),
            },
            idempotency_key: "checkout-1".to_string(),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn test_transition_table() {
        use IntentStatus::*;
        assert!(Held.can_transition_to(PaymentPending));
        assert!(PaymentPending.can_transition_to(Expired));
        assert!(Confirming.can_transition_to(Confirmed));
        assert!(!Confirming.can_transition_to(Expired));
        assert!(!PaymentPending.can_transition_to(Held));
        assert!(!Expired.can_transition_to(Confirmed));

        for terminal in [Confirmed, Cancelled, Expired, ConfirmationFailed] {
            assert!(terminal.is_terminal());
        }

        assert_eq!(
            IntentStatus::allowed_sources(Confirmed),
            vec![Held, PaymentPending, Confirming]
        );
        assert_eq!(IntentStatus::allowed_sources(Expired), vec![Held, PaymentPending]);
        assert_eq!(
            IntentStatus::allowed_sources(ConfirmationFailed),
            vec![Held, PaymentPending, Confirming]
        );
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in IntentStatus::ALL {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
        assert!("HELD".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn test_payload_kind() {
        let bus = BusLeg {
            trip_id: Uuid::new_v4(),
            seat_ids: vec![Uuid::new_v4()],
            boarding_point: None,
            dropping_point: None,
            passenger_names: vec![],
        };
        let lounge = LoungeLeg {
            lounge_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            slot: slot(8, 10),
            guests: 2,
        };

        let bus_only = IntentPayload {
            bus: Some(bus.clone()),
            ..Default::default()
        };
        assert_eq!(bus_only.validate().unwrap(), IntentKind::Bus);

        let combo = IntentPayload {
            bus: Some(bus),
            post_trip_lounge: Some(lounge.clone()),
            ..Default::default()
        };
        assert_eq!(combo.validate().unwrap(), IntentKind::Combo);

        let zero_guests = IntentPayload {
            pre_trip_lounge: Some(LoungeLeg { guests: 0, ..lounge }),
            ..Default::default()
        };
        assert!(matches!(zero_guests.validate(), Err(HoldError::Validation(_))));

        assert!(IntentPayload::default().validate().is_err());
    }

    #[test]
    fn test_new_intent_rejects_blank_key() {
        let mut intent = new_intent(IntentPayload {
            bus: Some(BusLeg {
                trip_id: Uuid::new_v4(),
                seat_ids: vec![Uuid::new_v4()],
                boarding_point: None,
                dropping_point: None,
                passenger_names: vec![],
            }),
            ..Default::default()
        });
        assert!(intent.validate().is_ok());

        intent.idempotency_key = "   ".to_string();
        assert!(intent.validate().is_err());
    }

    #[test]
    fn test_apply_clears_deadline_outside_hold_states() {
        let new = new_intent(IntentPayload {
            bus: Some(BusLeg {
                trip_id: Uuid::new_v4(),
                seat_ids: vec![Uuid::new_v4()],
                boarding_point: None,
                dropping_point: None,
                passenger_names: vec![],
            }),
            ..Default::default()
        });
        let now = Utc::now();
        let mut intent = new.into_intent(Uuid::new_v4(), IntentKind::Bus, now);
        assert_eq!(intent.total_amount, 127_000);
        assert!(intent.expires_at.is_some());

        let deadline = now + Duration::minutes(30);
        IntentTransition::PaymentPending {
            reference: "pay_123".to_string(),
            gateway: "mock".to_string(),
            expires_at: deadline,
        }
        .apply(&mut intent, now);
        assert_eq!(intent.status, IntentStatus::PaymentPending);
        assert_eq!(intent.expires_at, Some(deadline));
        assert_eq!(intent.payment_initiated_at, Some(now));

        let fence = now + Duration::minutes(5);
        IntentTransition::Confirming { expires_at: fence }.apply(&mut intent, now);
        assert_eq!(intent.status, IntentStatus::Confirming);
        assert_eq!(intent.expires_at, Some(fence));
        assert!(intent.is_overdue(fence + Duration::seconds(1)));

        IntentTransition::ConfirmationFailed.apply(&mut intent, now);
        assert_eq!(intent.status, IntentStatus::ConfirmationFailed);
        assert_eq!(intent.expires_at, None);
        assert!(!intent.is_overdue(fence + Duration::seconds(1)));
    }

    #[test]
    fn test_expired_clears_deadline() {
        let new = new_intent(IntentPayload {
            bus: Some(BusLeg {
                trip_id: Uuid::new_v4(),
                seat_ids: vec![Uuid::new_v4()],
                boarding_point: None,
                dropping_point: None,
                passenger_names: vec![],
            }),
            ..Default::default()
        });
        let now = Utc::now();
        let mut intent = new.into_intent(Uuid::new_v4(), IntentKind::Bus, now);

        IntentTransition::Expired.apply(&mut intent, now);
        assert_eq!(intent.status, IntentStatus::Expired);
        assert_eq!(intent.expires_at, None);
        assert_eq!(intent.expired_at, Some(now));
    }
}
