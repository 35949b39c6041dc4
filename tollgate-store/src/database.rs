use crate::app_config::BusinessRules;
use crate::pg_store::PgHoldStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    pub fn hold_store(&self) -> PgHoldStore {
        PgHoldStore::new(self.pool.clone())
    }

    /// Overlay rows from `business_rules` on top of the file configuration.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> =
            sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
                .fetch_all(&self.pool)
                .await?;

        Ok(apply_rule_rows(defaults, rows))
    }
}

// Expected row format: {"value": <number>}
fn apply_rule_rows(defaults: BusinessRules, rows: Vec<(String, Value)>) -> BusinessRules {
    let mut rules = defaults;

    for (key, value) in rows {
        let Some(v) = value.get("value") else { continue };
        match key.as_str() {
            "hold_ttl_seconds" => if let Some(u) = v.as_u64() { rules.hold_ttl_seconds = u; },
            "payment_timeout_seconds" => if let Some(u) = v.as_u64() { rules.payment_timeout_seconds = u; },
            "confirmation_timeout_seconds" => if let Some(u) = v.as_u64() { rules.confirmation_timeout_seconds = u; },
            "reaper_batch_size" => if let Some(i) = v.as_i64().filter(|i| *i > 0) { rules.reaper_batch_size = i; },
            other => info!(rule = other, "Ignoring unknown business rule"),
        }
    }

    rules
}
