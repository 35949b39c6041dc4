use crate::error::{HoldError, HoldResult};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> HoldResult<Self> {
        let slot = Self { start, end };
        slot.validate()?;
        Ok(slot)
    }

    pub fn validate(&self) -> HoldResult<()> {
        if self.start >= self.end {
            return Err(HoldError::Validation(format!(
                "invalid time slot {}-{}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// `[a,b)` and `[c,d)` overlap iff `a < d && c < b`.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoungeHoldStatus {
    Held,
    Released,
    Confirmed,
}

impl LoungeHoldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoungeHoldStatus::Held => "held",
            LoungeHoldStatus::Released => "released",
            LoungeHoldStatus::Confirmed => "confirmed",
        }
    }
}

impl FromStr for LoungeHoldStatus {
    type Err = HoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(LoungeHoldStatus::Held),
            "released" => Ok(LoungeHoldStatus::Released),
            "confirmed" => Ok(LoungeHoldStatus::Confirmed),
            other => Err(HoldError::Validation(format!("unknown lounge hold status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoungeCapacityHold {
    pub id: Uuid,
    pub lounge_id: Uuid,
    pub intent_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub guests: i32,
    pub held_until: DateTime<Utc>,
    pub status: LoungeHoldStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoungeCapacityHold {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LoungeHoldStatus::Held && self.held_until >= now
    }

    pub fn competes_with(&self, lounge_id: Uuid, date: NaiveDate, slot: &TimeSlot) -> bool {
        self.lounge_id == lounge_id && self.date == date && self.slot.overlaps(slot)
    }
}

#[derive(Debug, Clone)]
pub struct NewLoungeHold {
    pub lounge_id: Uuid,
    pub intent_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub guests: i32,
    pub held_until: DateTime<Utc>,
}

impl NewLoungeHold {
    pub fn validate(&self) -> HoldResult<()> {
        self.slot.validate()?;
        if self.guests <= 0 {
            return Err(HoldError::Validation(format!(
                "guest count must be positive, got {}",
                self.guests
            )));
        }
        Ok(())
    }

    pub fn into_hold(self, id: Uuid, now: DateTime<Utc>) -> LoungeCapacityHold {
        LoungeCapacityHold {
            id,
            lounge_id: self.lounge_id,
            intent_id: self.intent_id,
            date: self.date,
            slot: self.slot,
            guests: self.guests,
            held_until: self.held_until,
            status: LoungeHoldStatus::Held,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Guests competing for an overlapping slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoungeOccupancy {
    pub confirmed_guests: i32,
    pub held_guests: i32,
}

impl LoungeOccupancy {
    /// Sum the rows that count against `slot` at `now`.
    pub fn tally<'a>(
        holds: impl IntoIterator<Item = &'a LoungeCapacityHold>,
        lounge_id: Uuid,
        date: NaiveDate,
        slot: &TimeSlot,
        now: DateTime<Utc>,
    ) -> Self {
        let mut occupancy = LoungeOccupancy::default();
        for hold in holds {
            if !hold.competes_with(lounge_id, date, slot) {
                continue;
            }
            match hold.status {
                LoungeHoldStatus::Confirmed => occupancy.confirmed_guests += hold.guests,
                LoungeHoldStatus::Held if hold.held_until >= now => {
                    occupancy.held_guests += hold.guests
                }
                _ => {}
            }
        }
        occupancy
    }

    /// Remaining capacity, floored at zero.
    pub fn available(&self, max_capacity: i32) -> i32 {
        (max_capacity - self.confirmed_guests - self.held_guests).max(0)
    }
}
