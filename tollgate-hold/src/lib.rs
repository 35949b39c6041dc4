pub mod audit;
pub mod intent;
pub mod lounge;
pub mod payment;
pub mod reaper;
pub mod seat;

pub use audit::PaymentAuditLog;
pub use intent::{BookingIntentStore, CreateIntent, ExpiryOutcome, HoldPolicy};
pub use lounge::LoungeCapacityManager;
pub use payment::{MockPaymentGateway, PaymentOrchestrator, WebhookOutcome};
pub use reaper::{Reaper, SweepReport};
pub use seat::SeatHoldManager;
