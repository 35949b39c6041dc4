pub mod app_config;
pub mod database;
pub mod memory;
pub mod pg_store;

mod audit_repo;
mod intent_repo;
mod lounge_repo;
mod seat_repo;

pub use database::DbClient;
pub use memory::MemoryHoldStore;
pub use pg_store::PgHoldStore;
