//! PostgreSQL implementation of AuthorDirectory.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{AuthorId, DomainError, ErrorCode};
use crate::ports::{AuthorDirectory, AuthorPricing};

pub struct PostgresAuthorDirectory {
    pool: PgPool,
}

impl PostgresAuthorDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PricingRow {
    monthly_price_cents: Option<i64>,
    yearly_price_cents: Option<i64>,
    lifetime_price_cents: Option<i64>,
    trial_days: i32,
}

impl From<PricingRow> for AuthorPricing {
    fn from(row: PricingRow) -> Self {
        Self {
            monthly_cents: row.monthly_price_cents,
            yearly_cents: row.yearly_price_cents,
            lifetime_cents: row.lifetime_price_cents,
            // CHECK (trial_days >= 0) keeps this lossless
            trial_days: u32::try_from(row.trial_days).unwrap_or(0),
        }
    }
}

#[async_trait]
impl AuthorDirectory for PostgresAuthorDirectory {
    async fn pricing(&self, author_id: &AuthorId) -> Result<Option<AuthorPricing>, DomainError> {
        let row: Option<PricingRow> = sqlx::query_as(
            r#"
            SELECT monthly_price_cents, yearly_price_cents, lifetime_price_cents, trial_days
            FROM authors
            WHERE id = $1
            "#,
        )
        .bind(author_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to load author pricing: {}", e))
        })?;

        Ok(row.map(AuthorPricing::from))
    }
}
