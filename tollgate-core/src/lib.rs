pub mod audit;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod lounge;
pub mod repository;
pub mod seat;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, HoldError, HoldResult};
pub use intent::{BookingIntent, IntentStatus, IntentTransition, NewIntent};
pub use repository::{HoldStore, UnitOfWork};
