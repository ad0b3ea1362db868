//! Expiration sweeper configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweeper inside this process
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum due subscriptions processed per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum subscriptions processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds between counter reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 || self.interval_secs > 86_400 {
            return Err(ValidationError::InvalidSweeperInterval);
        }
        if self.reconcile_interval_secs == 0 || self.reconcile_interval_secs > 86_400 {
            return Err(ValidationError::InvalidSweeperInterval);
        }
        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ValidationError::InvalidConcurrency);
        }
        Ok(())
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    8
}

fn default_reconcile_interval() -> u64 {
    3600
}
