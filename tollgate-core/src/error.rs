use crate::intent::IntentStatus;
use uuid::Uuid;

/// Error classes upstream callers translate into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Persistence,
    AuditWriteFailure,
    Gateway,
}

#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Seats no longer available: requested {requested}, acquired {acquired}")]
    SeatsUnavailable { requested: usize, acquired: u64 },

    #[error("Insufficient lounge capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("Intent {id} is {current}, cannot move to {target}")]
    WrongState {
        id: Uuid,
        current: IntentStatus,
        target: IntentStatus,
    },

    /// Seat or lounge holds lapsed or were taken before the intent could be confirmed.
    #[error("Holds of intent {id} lapsed before confirmation: {detail}")]
    HoldsLost { id: Uuid, detail: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The enclosing transaction was rolled back; safe to retry as a fresh attempt.
    #[error("Persistence failure during {operation}: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
    },

    /// Never recovered locally.
    #[error("Payment audit write failed: {0}")]
    AuditWriteFailure(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),
}

pub type HoldResult<T> = Result<T, HoldError>;

impl HoldError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        HoldError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn persistence(operation: &'static str, err: impl std::fmt::Display) -> Self {
        HoldError::Persistence {
            operation,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HoldError::Validation(_) => ErrorKind::Validation,
            HoldError::SeatsUnavailable { .. }
            | HoldError::InsufficientCapacity { .. }
            | HoldError::WrongState { .. }
            | HoldError::HoldsLost { .. } => ErrorKind::Conflict,
            HoldError::NotFound { .. } => ErrorKind::NotFound,
            HoldError::Persistence { .. } => ErrorKind::Persistence,
            HoldError::AuditWriteFailure(_) => ErrorKind::AuditWriteFailure,
            HoldError::Gateway(_) => ErrorKind::Gateway,
        }
    }

    /// Message safe to show an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            HoldError::WrongState { current, .. }
                if matches!(current, IntentStatus::Expired | IntentStatus::Cancelled) =>
            {
                "Reservation expired, please start again"
            }
            HoldError::WrongState {
                current: IntentStatus::Confirmed,
                ..
            } => "Booking already confirmed",
            _ => match self.kind() {
                ErrorKind::Validation => "Invalid booking request",
                ErrorKind::Conflict => "No longer available, please retry",
                ErrorKind::NotFound => "Unknown booking",
                ErrorKind::Persistence => "Could not complete the request, please retry",
                ErrorKind::AuditWriteFailure | ErrorKind::Gateway => {
                    "Payment could not be processed right now"
                }
            },
        }
    }
}
