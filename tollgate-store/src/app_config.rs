use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub reaper: ReaperConfig,
}

/// Timings that can also be overridden at runtime from the `business_rules` table.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BusinessRules {
    pub hold_ttl_seconds: u64,
    pub payment_timeout_seconds: u64,
    /// How long a `confirming` intent may wait on downstream bookings.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub reaper_batch_size: i64,
}

fn default_confirmation_timeout() -> u64 { 300 }

fn default_batch_size() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct ReaperConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub interval_seconds: u64,
    #[serde(default)]
    pub jitter_millis: u64,
}

fn default_enabled() -> bool { true }

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `TOLLGATE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("TOLLGATE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let s = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 8080

                [database]
                url = "postgres://localhost/tollgate"

                [business_rules]
                hold_ttl_seconds = 600
                payment_timeout_seconds = 1800

                [reaper]
                interval_seconds = 30
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let cfg: Config = s.try_deserialize().unwrap();
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.business_rules.reaper_batch_size, 100);
        assert_eq!(cfg.business_rules.confirmation_timeout_seconds, 300);
        assert!(cfg.reaper.enabled);
        assert_eq!(cfg.reaper.jitter_millis, 0);
    }
}
