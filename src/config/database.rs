//! Database configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Where subscriptions are persisted.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Process-local state, lost on restart. Development only.
    Memory,
}

/// Author offered by the in-memory backend at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAuthor {
    pub author_id: String,
    pub monthly_cents: Option<i64>,
    pub yearly_cents: Option<i64>,
    pub lifetime_cents: Option<i64>,
    pub trial_days: u32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run migrations on startup
    #[serde(default)]
    pub run_migrations: bool,

    /// Authors for the memory backend, as
    /// `id:monthly:yearly:lifetime:trial_days` entries separated by `;`.
    /// An empty price field means the plan is not offered.
    #[serde(default)]
    pub memory_authors: Option<String>,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Parsed `memory_authors`; empty when unset.
    pub fn seed_authors(&self) -> Result<Vec<SeedAuthor>, ValidationError> {
        let Some(raw) = self.memory_authors.as_deref() else {
            return Ok(Vec::new());
        };
        raw.split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(parse_seed_author)
            .collect()
    }

    /// Validate database configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backend == StoreBackend::Memory {
            self.seed_authors()?;
            return Ok(());
        }
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("DATABASE__URL"));
        }
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ValidationError::InvalidDatabaseUrl);
        }
        if self.min_connections > self.max_connections {
            return Err(ValidationError::InvalidPoolSize);
        }
        if self.max_connections > 100 {
            return Err(ValidationError::PoolSizeTooLarge);
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: String::new(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: false,
            memory_authors: None,
        }
    }
}

fn parse_seed_author(entry: &str) -> Result<SeedAuthor, ValidationError> {
    let invalid = || ValidationError::InvalidSeedAuthor(entry.to_string());
    let fields: Vec<&str> = entry.split(':').map(str::trim).collect();
    let [author_id, monthly, yearly, lifetime, trial_days] = fields.as_slice() else {
        return Err(invalid());
    };
    if author_id.is_empty() {
        return Err(invalid());
    }
    let price = |field: &str| -> Result<Option<i64>, ValidationError> {
        if field.is_empty() {
            return Ok(None);
        }
        match field.parse::<i64>() {
            Ok(cents) if cents >= 0 => Ok(Some(cents)),
            _ => Err(invalid()),
        }
    };
    let trial_days = if trial_days.is_empty() {
        0
    } else {
        trial_days.parse().map_err(|_| invalid())?
    };

    Ok(SeedAuthor {
        author_id: author_id.to_string(),
        monthly_cents: price(monthly)?,
        yearly_cents: price(yearly)?,
        lifetime_cents: price(lifetime)?,
        trial_days,
    })
}

fn default_min_connections() -> u32 {
    2
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}
