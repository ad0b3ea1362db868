//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables use the `AUTHOR_SUBS` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use author_subscriptions::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod payment;
mod server;
mod sweeper;

pub use database::{DatabaseConfig, SeedAuthor, StoreBackend};
pub use error::{ConfigError, ValidationError};
pub use payment::{PaymentConfig, PaymentProvider};
pub use server::{Environment, LogFormat, ServerConfig};
pub use sweeper::SweeperConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Subscription store backend and PostgreSQL pool
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Payment gateway configuration (Stripe)
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Background expiration sweeper
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with the `AUTHOR_SUBS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `AUTHOR_SUBS__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `AUTHOR_SUBS__DATABASE__URL=...` -> `database.url = ...`
    /// - `AUTHOR_SUBS__PAYMENT__STRIPE_API_KEY=...` -> `payment.stripe_api_key = ...`
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("AUTHOR_SUBS")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Headroom a request needs beyond one gateway call to insert, settle and respond.
    pub const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 10;

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate()?;
        self.sweeper.validate()?;

        // A request must not time out while its charge can still be captured.
        if self.server.request_timeout_secs
            < self.payment.charge_timeout_secs + Self::REQUEST_TIMEOUT_MARGIN_SECS
        {
            return Err(ValidationError::RequestTimeoutBelowCharge {
                margin: Self::REQUEST_TIMEOUT_MARGIN_SECS,
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "AUTHOR_SUBS__DATABASE__URL",
        "AUTHOR_SUBS__DATABASE__BACKEND",
        "AUTHOR_SUBS__DATABASE__MEMORY_AUTHORS",
        "AUTHOR_SUBS__PAYMENT__STRIPE_API_KEY",
        "AUTHOR_SUBS__PAYMENT__STRIPE_WEBHOOK_SECRET",
        "AUTHOR_SUBS__PAYMENT__PROVIDER",
        "AUTHOR_SUBS__SERVER__PORT",
        "AUTHOR_SUBS__SERVER__ENVIRONMENT",
        "AUTHOR_SUBS__SERVER__REQUEST_TIMEOUT_SECS",
        "AUTHOR_SUBS__PAYMENT__CHARGE_TIMEOUT_SECS",
        "AUTHOR_SUBS__SWEEPER__BATCH_SIZE",
    ];

    fn set_minimal_env() {
        env::set_var("AUTHOR_SUBS__DATABASE__URL", "postgresql://test@localhost/test");
        env::set_var("AUTHOR_SUBS__PAYMENT__STRIPE_API_KEY", "sk_test_xxx");
        env::set_var("AUTHOR_SUBS__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.expect("config should load");
        assert_eq!(config.database.url, "postgresql://test@localhost/test");
        assert_eq!(
            config.payment.stripe_api_key.as_ref().map(|k| k.expose_secret().as_str()),
            Some("sk_test_xxx")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_unset() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let config = AppConfig::load().unwrap();
        clear_env();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.payment.currency, "USD");
        assert_eq!(config.sweeper.batch_size, 100);
    }

    #[test]
    fn test_overrides_nested_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("AUTHOR_SUBS__SERVER__PORT", "3000");
        env::set_var("AUTHOR_SUBS__SERVER__ENVIRONMENT", "production");
        env::set_var("AUTHOR_SUBS__SWEEPER__BATCH_SIZE", "25");
        let config = AppConfig::load().unwrap();
        clear_env();

        assert_eq!(config.server.port, 3000);
        assert!(config.is_production());
        assert_eq!(config.sweeper.batch_size, 25);
    }

    #[test]
    fn test_local_development_profile() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("AUTHOR_SUBS__DATABASE__BACKEND", "memory");
        env::set_var("AUTHOR_SUBS__PAYMENT__PROVIDER", "mock");
        let config = AppConfig::load().unwrap();
        clear_env();

        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.payment.provider, PaymentProvider::Mock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_authors_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("AUTHOR_SUBS__DATABASE__BACKEND", "memory");
        env::set_var("AUTHOR_SUBS__PAYMENT__PROVIDER", "mock");
        env::set_var("AUTHOR_SUBS__DATABASE__MEMORY_AUTHORS", "author-1:1000:10000::14");
        let config = AppConfig::load().unwrap();
        clear_env();

        assert!(config.validate().is_ok());
        let authors = config.database.seed_authors().unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].author_id, "author-1");
        assert_eq!(authors[0].yearly_cents, Some(10000));
        assert_eq!(authors[0].lifetime_cents, None);
        assert_eq!(authors[0].trial_days, 14);
    }

    #[test]
    fn test_request_timeout_must_outlast_charge_timeout() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("AUTHOR_SUBS__DATABASE__BACKEND", "memory");
        env::set_var("AUTHOR_SUBS__PAYMENT__PROVIDER", "mock");
        env::set_var("AUTHOR_SUBS__SERVER__REQUEST_TIMEOUT_SECS", "30");
        env::set_var("AUTHOR_SUBS__PAYMENT__CHARGE_TIMEOUT_SECS", "30");
        let config = AppConfig::load().unwrap();
        clear_env();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::RequestTimeoutBelowCharge { margin: 10 })
        ));

        let mut config = config;
        config.server.request_timeout_secs = 40;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_database_url_fails_validation() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("AUTHOR_SUBS__PAYMENT__PROVIDER", "mock");
        let config = AppConfig::load().unwrap();
        clear_env();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired(_))
        ));
    }
}
