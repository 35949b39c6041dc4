use crate::error::{HoldError, HoldResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Booked,
    Blocked,
}

impl SeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Booked => "booked",
            SeatStatus::Blocked => "blocked",
        }
    }
}

impl FromStr for SeatStatus {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "booked" => Ok(SeatStatus::Booked),
            "blocked" => Ok(SeatStatus::Blocked),
            other => Err(HoldError::Validation(format!("unknown seat status: {other}"))),
        }
    }
}

/// A seat inventory row with its transient hold columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripSeat {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub seat_number: String,
    pub status: SeatStatus,
    pub held_by_intent_id: Option<Uuid>,
    pub held_until: Option<DateTime<Utc>>,
}

impl TripSeat {
    pub fn new(trip_id: Uuid, seat_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            seat_number: seat_number.into(),
            status: SeatStatus::Available,
            held_by_intent_id: None,
            held_until: None,
        }
    }

    /// `status = available AND (held_by_intent_id IS NULL OR held_until < now)`
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != SeatStatus::Available {
            return false;
        }
        match (self.held_by_intent_id, self.held_until) {
            (None, _) => true,
            (Some(_), Some(until)) => until < now,
            (Some(_), None) => false,
        }
    }

    /// A live hold owned by `intent_id`.
    pub fn is_held_by(&self, intent_id: Uuid, now: DateTime<Utc>) -> bool {
        self.held_by_intent_id == Some(intent_id) && self.held_until.is_some_and(|t| t >= now)
    }

    pub fn clear_hold(&mut self) {
        self.held_by_intent_id = None;
        self.held_until = None;
    }
}

/// Requested seats split by the availability predicate, in request order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatAvailability {
    pub available: Vec<Uuid>,
    pub unavailable: Vec<Uuid>,
}

impl SeatAvailability {
    /// Unknown ids land in `unavailable`.
    pub fn partition(requested: &[Uuid], rows: &[TripSeat], now: DateTime<Utc>) -> Self {
        let by_id: HashMap<Uuid, &TripSeat> = rows.iter().map(|s| (s.id, s)).collect();
        let mut result = SeatAvailability::default();
        for id in requested {
            match by_id.get(id) {
                Some(seat) if seat.is_available_at(now) => result.available.push(*id),
                _ => result.unavailable.push(*id),
            }
        }
        result
    }

    pub fn all_available(&self) -> bool {
        self.unavailable.is_empty()
    }
}

pub fn validate_seat_ids(seat_ids: &[Uuid]) -> HoldResult<()> {
    if seat_ids.is_empty() {
        return Err(HoldError::Validation("seat list is empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(seat_ids.len());
    if let Some(dup) = seat_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(HoldError::Validation(format!("seat {dup} requested twice")));
    }
    Ok(())
}
