//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Invalid memory author entry: {0}")]
    InvalidSeedAuthor(String),

    #[error("Invalid Stripe API key format")]
    InvalidStripeKey,

    #[error("Invalid Stripe webhook secret format")]
    InvalidStripeWebhookSecret,

    #[error("Currency must be a three-letter ISO 4217 code")]
    InvalidCurrency,

    #[error("Charge timeout must be between 1 and {max} seconds")]
    InvalidChargeTimeout { max: u64 },

    #[error("Request timeout must exceed the charge timeout by at least {margin} seconds")]
    RequestTimeoutBelowCharge { margin: u64 },

    #[error("Pending payment timeout must be at least 60 seconds")]
    InvalidPendingTimeout,

    #[error("Sweeper interval must be between 1 and 86400 seconds")]
    InvalidSweeperInterval,

    #[error("Sweeper batch size must be between 1 and 10000")]
    InvalidBatchSize,

    #[error("Sweeper concurrency must be between 1 and 64")]
    InvalidConcurrency,
}
