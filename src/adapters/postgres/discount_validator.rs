//! PostgreSQL implementation of DiscountValidator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::memory::DiscountRule;
use crate::domain::foundation::{AuthorId, DomainError, ErrorCode, Percentage, Timestamp};
use crate::domain::subscription::DiscountCode;
use crate::ports::{Clock, DiscountValidation, DiscountValidator};

/// Reads codes from `discount_codes`; inactive codes are treated as unknown.
pub struct PostgresDiscountValidator {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresDiscountValidator {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DiscountRow {
    percent: i16,
    author_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<DiscountRow> for DiscountRule {
    type Error = DomainError;

    fn try_from(row: DiscountRow) -> Result<Self, Self::Error> {
        let invalid = |e: String| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid discount_codes row: {}", e))
        };
        let percent = u8::try_from(row.percent)
            .map_err(|e| invalid(e.to_string()))
            .and_then(|p| Percentage::try_new(p).map_err(|e| invalid(e.to_string())))?;

        let mut rule = DiscountRule::percent(percent);
        if let Some(author) = row.author_id {
            rule = rule.for_author(AuthorId::new(author).map_err(|e| invalid(e.to_string()))?);
        }
        if let Some(expires_at) = row.expires_at {
            rule = rule.expiring_at(Timestamp::from_datetime(expires_at));
        }
        Ok(rule)
    }
}

#[async_trait]
impl DiscountValidator for PostgresDiscountValidator {
    async fn validate(
        &self,
        code: &DiscountCode,
        author_id: &AuthorId,
    ) -> Result<DiscountValidation, DomainError> {
        let row: Option<DiscountRow> = sqlx::query_as(
            "SELECT percent, author_id, expires_at FROM discount_codes WHERE code = $1 AND active",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to load discount code: {}", e))
        })?;

        match row {
            Some(row) => Ok(DiscountRule::try_from(row)?.evaluate(author_id, self.clock.now())),
            None => Ok(DiscountValidation::Invalid("Unknown discount code".to_string())),
        }
    }
}
