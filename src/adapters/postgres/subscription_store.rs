//! PostgreSQL implementation of SubscriptionStore.
//!
//! Every write runs in one transaction that covers the subscription row and
//! the author's `subscriber_count`, so a status change and its counter delta
//! commit or roll back together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{
    AuthorId, DomainError, ErrorCode, Percentage, SubscriberId, SubscriptionId, Timestamp,
};
use crate::domain::subscription::{
    PaymentReference, Subscription, SubscriptionStatus, PAYMENT_FAILED_REASON,
};
use crate::ports::{CounterReconciliation, SubscriptionStore, UpdateOutcome};

/// Partial unique index enforcing one open subscription per pair.
const ONE_OPEN_PER_PAIR: &str = "subscriptions_one_open_per_pair";

const SELECT_COLUMNS: &str = r#"
    SELECT id, subscriber_id, author_id, plan, price_cents, discount_percent, status,
           payment_token, started_at, expires_at, next_billing_date, trial_expires_at, cancelled_at,
           cancellation_reason, auto_renewal, total_paid_cents,
           last_payment_id, last_payment_amount_cents, last_payment_captured,
           last_payment_failure, last_payment_at,
           renewal_from, renewal_claimed_at, pending_charge_key,
           created_at, updated_at, version
    FROM subscriptions
"#;

/// PostgreSQL implementation of the SubscriptionStore port.
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DomainError> {
        self.pool.begin().await.map_err(db_error("begin transaction"))
    }

    async fn fetch_all(&self, sql: &str, binds: Binds) -> Result<Vec<Subscription>, DomainError> {
        let mut query = sqlx::query_as::<_, SubscriptionRow>(sql);
        for bind in binds {
            query = match bind {
                Bind::Uuid(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
                Bind::Time(v) => query.bind(v),
                Bind::Int(v) => query.bind(v),
            };
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("query subscriptions"))?;
        rows.into_iter().map(Subscription::try_from).collect()
    }
}

/// Positional parameters for the read queries.
enum Bind {
    Uuid(Uuid),
    Text(String),
    Time(DateTime<Utc>),
    Int(i64),
}

type Binds = Vec<Bind>;

fn select(clause: &str) -> String {
    format!("{} {}", SELECT_COLUMNS, clause)
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    subscriber_id: String,
    author_id: String,
    plan: String,
    price_cents: i64,
    discount_percent: Option<i16>,
    status: String,
    payment_token: String,
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    next_billing_date: Option<DateTime<Utc>>,
    trial_expires_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    auto_renewal: bool,
    total_paid_cents: i64,
    last_payment_id: Option<String>,
    last_payment_amount_cents: Option<i64>,
    last_payment_captured: Option<bool>,
    last_payment_failure: Option<String>,
    last_payment_at: Option<DateTime<Utc>>,
    renewal_from: Option<String>,
    renewal_claimed_at: Option<DateTime<Utc>>,
    pending_charge_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} value in subscriptions row: {}", field, err),
    )
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let discount_percent = row
            .discount_percent
            .map(|p| {
                u8::try_from(p)
                    .map_err(|e| corrupt("discount_percent", e))
                    .and_then(|p| Percentage::try_new(p).map_err(|e| corrupt("discount_percent", e)))
            })
            .transpose()?;

        let last_payment = match (row.last_payment_amount_cents, row.last_payment_at) {
            (Some(amount_cents), Some(attempted_at)) => Some(PaymentReference {
                external_payment_id: row.last_payment_id,
                amount_cents,
                captured: row.last_payment_captured.unwrap_or(false),
                failure_reason: row.last_payment_failure,
                attempted_at: Timestamp::from_datetime(attempted_at),
            }),
            _ => None,
        };

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            subscriber_id: SubscriberId::new(row.subscriber_id).map_err(|e| corrupt("subscriber_id", e))?,
            author_id: AuthorId::new(row.author_id).map_err(|e| corrupt("author_id", e))?,
            plan: row.plan.parse().map_err(|e| corrupt("plan", e))?,
            price_cents: row.price_cents,
            discount_percent,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            payment_token: row.payment_token,
            started_at: Timestamp::from_datetime(row.started_at),
            expires_at: Timestamp::from_datetime(row.expires_at),
            next_billing_date: row.next_billing_date.map(Timestamp::from_datetime),
            trial_expires_at: row.trial_expires_at.map(Timestamp::from_datetime),
            cancelled_at: row.cancelled_at.map(Timestamp::from_datetime),
            cancellation_reason: row.cancellation_reason,
            auto_renewal: row.auto_renewal,
            total_paid_cents: row.total_paid_cents,
            last_payment,
            renewal_from: row
                .renewal_from
                .map(|s| s.parse::<SubscriptionStatus>())
                .transpose()
                .map_err(|e| corrupt("renewal_from", e))?,
            renewal_claimed_at: row.renewal_claimed_at.map(Timestamp::from_datetime),
            pending_charge_key: row.pending_charge_key,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            version: u32::try_from(row.version).map_err(|e| corrupt("version", e))?,
        })
    }
}

/// Maps the one-open-per-pair index violation to a duplicate error.
fn write_error(err: sqlx::Error, subscription: &Subscription, action: &str) -> DomainError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some(ONE_OPEN_PER_PAIR) {
            return DomainError::new(
                ErrorCode::DuplicateSubscription,
                "Subscriber already has an open subscription to this author",
            )
            .with_detail("subscriber_id", subscription.subscriber_id.as_str())
            .with_detail("author_id", subscription.author_id.as_str());
        }
    }
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, err))
}

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, e))
}

fn counted(status: SubscriptionStatus) -> i64 {
    i64::from(status.is_counted())
}

/// Applies a counter delta inside `tx`, refusing to go below zero.
async fn apply_delta(
    tx: &mut Transaction<'static, Postgres>,
    author_id: &AuthorId,
    delta: i64,
) -> Result<(), DomainError> {
    if delta == 0 {
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE authors
        SET subscriber_count = subscriber_count + $2, updated_at = NOW()
        WHERE id = $1 AND subscriber_count + $2 >= 0
        "#,
    )
    .bind(author_id.as_str())
    .bind(delta)
    .execute(&mut **tx)
    .await
    .map_err(db_error("update subscriber_count"))?;

    if result.rows_affected() == 0 {
        return Err(DomainError::new(
            ErrorCode::CounterInconsistency,
            format!(
                "subscriber_count for author {} cannot absorb delta {}",
                author_id, delta
            ),
        )
        .with_detail("author_id", author_id.as_str()));
    }
    Ok(())
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<Subscription, DomainError> {
        let mut tx = self.begin().await?;
        let payment = subscription.last_payment.as_ref();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, subscriber_id, author_id, plan, price_cents, discount_percent, status,
                payment_token, started_at, expires_at, next_billing_date, trial_expires_at,
                cancelled_at, cancellation_reason, auto_renewal, total_paid_cents,
                last_payment_id, last_payment_amount_cents, last_payment_captured,
                last_payment_failure, last_payment_at,
                renewal_from, renewal_claimed_at, pending_charge_key,
                created_at, updated_at, version
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, 0
            )
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.subscriber_id.as_str())
        .bind(subscription.author_id.as_str())
        .bind(subscription.plan.as_str())
        .bind(subscription.price_cents)
        .bind(subscription.discount_percent.map(|p| i16::from(p.value())))
        .bind(subscription.status.as_str())
        .bind(&subscription.payment_token)
        .bind(subscription.started_at.as_datetime())
        .bind(subscription.expires_at.as_datetime())
        .bind(subscription.next_billing_date.map(|t| *t.as_datetime()))
        .bind(subscription.trial_expires_at.map(|t| *t.as_datetime()))
        .bind(subscription.cancelled_at.map(|t| *t.as_datetime()))
        .bind(&subscription.cancellation_reason)
        .bind(subscription.auto_renewal)
        .bind(subscription.total_paid_cents)
        .bind(payment.and_then(|p| p.external_payment_id.clone()))
        .bind(payment.map(|p| p.amount_cents))
        .bind(payment.map(|p| p.captured))
        .bind(payment.and_then(|p| p.failure_reason.clone()))
        .bind(payment.map(|p| *p.attempted_at.as_datetime()))
        .bind(subscription.renewal_from.map(|s| s.as_str()))
        .bind(subscription.renewal_claimed_at.map(|t| *t.as_datetime()))
        .bind(&subscription.pending_charge_key)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, subscription, "insert subscription"))?;

        apply_delta(&mut tx, &subscription.author_id, counted(subscription.status)).await?;
        tx.commit().await.map_err(db_error("commit insert"))?;

        let mut stored = subscription.clone();
        stored.version = 0;
        Ok(stored)
    }

    async fn update(&self, subscription: &Subscription) -> Result<UpdateOutcome, DomainError> {
        let mut tx = self.begin().await?;

        let current: Option<(String, String, i32)> = sqlx::query_as(
            "SELECT status, author_id, version FROM subscriptions WHERE id = $1 FOR UPDATE",
        )
        .bind(subscription.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock subscription"))?;

        let Some((status, author_id, version)) = current else {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription not found: {}", subscription.id),
            ));
        };

        if i64::from(version) != i64::from(subscription.version) {
            // Dropping the transaction rolls it back.
            return Ok(UpdateOutcome::Stale);
        }
        if author_id != subscription.author_id.as_str() {
            return Err(DomainError::validation("subscription", "Author is immutable"));
        }
        let previous: SubscriptionStatus = status.parse().map_err(|e| corrupt("status", e))?;

        let payment = subscription.last_payment.as_ref();
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                started_at = $3,
                expires_at = $4,
                next_billing_date = $5,
                cancelled_at = $6,
                cancellation_reason = $7,
                auto_renewal = $8,
                total_paid_cents = $9,
                last_payment_id = $10,
                last_payment_amount_cents = $11,
                last_payment_captured = $12,
                last_payment_failure = $13,
                last_payment_at = $14,
                renewal_from = $15,
                renewal_claimed_at = $16,
                updated_at = $17,
                payment_token = $18,
                pending_charge_key = $19,
                version = version + 1
            WHERE id = $1 AND version = $20
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(subscription.started_at.as_datetime())
        .bind(subscription.expires_at.as_datetime())
        .bind(subscription.next_billing_date.map(|t| *t.as_datetime()))
        .bind(subscription.cancelled_at.map(|t| *t.as_datetime()))
        .bind(&subscription.cancellation_reason)
        .bind(subscription.auto_renewal)
        .bind(subscription.total_paid_cents)
        .bind(payment.and_then(|p| p.external_payment_id.clone()))
        .bind(payment.map(|p| p.amount_cents))
        .bind(payment.map(|p| p.captured))
        .bind(payment.and_then(|p| p.failure_reason.clone()))
        .bind(payment.map(|p| *p.attempted_at.as_datetime()))
        .bind(subscription.renewal_from.map(|s| s.as_str()))
        .bind(subscription.renewal_claimed_at.map(|t| *t.as_datetime()))
        .bind(subscription.updated_at.as_datetime())
        .bind(&subscription.payment_token)
        .bind(&subscription.pending_charge_key)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, subscription, "update subscription"))?;

        let delta = counted(subscription.status) - counted(previous);
        apply_delta(&mut tx, &subscription.author_id, delta).await?;
        tx.commit().await.map_err(db_error("commit update"))?;

        let mut written = subscription.clone();
        written.version += 1;
        Ok(UpdateOutcome::Applied(written))
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let mut found = self
            .fetch_all(&select("WHERE id = $1"), vec![Bind::Uuid(*id.as_uuid())])
            .await?;
        Ok(found.pop())
    }

    async fn find_by_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_all(
            &select("WHERE subscriber_id = $1 ORDER BY created_at"),
            vec![Bind::Text(subscriber_id.as_str().to_string())],
        )
        .await
    }

    async fn find_by_author(&self, author_id: &AuthorId) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_all(
            &select("WHERE author_id = $1 ORDER BY created_at"),
            vec![Bind::Text(author_id.as_str().to_string())],
        )
        .await
    }

    async fn has_subscribed_before(
        &self,
        subscriber_id: &SubscriberId,
        author_id: &AuthorId,
    ) -> Result<bool, DomainError> {
        // Mirrors Subscription::ever_counted.
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM subscriptions
                WHERE subscriber_id = $1 AND author_id = $2
                  AND NOT (status = 'pending' AND renewal_from IS NULL)
                  AND NOT (
                      status = 'cancelled'
                      AND trial_expires_at IS NULL
                      AND total_paid_cents = 0
                      AND cancellation_reason LIKE $3
                  )
            )
            "#,
        )
        .bind(subscriber_id.as_str())
        .bind(author_id.as_str())
        .bind(format!("{}%", PAYMENT_FAILED_REASON))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("check subscription history"))?;
        Ok(exists)
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_all(
            &select(
                r#"
                WHERE status IN ('active', 'trial') AND expires_at <= $1
                ORDER BY expires_at ASC
                LIMIT $2
                "#,
            ),
            vec![Bind::Time(*now.as_datetime()), Bind::Int(i64::from(limit))],
        )
        .await
    }

    async fn find_stale_pending(
        &self,
        older_than: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_all(
            &select(
                r#"
                WHERE status = 'pending' AND updated_at < $1
                ORDER BY updated_at ASC
                LIMIT $2
                "#,
            ),
            vec![Bind::Time(*older_than.as_datetime()), Bind::Int(i64::from(limit))],
        )
        .await
    }

    async fn subscriber_count(&self, author_id: &AuthorId) -> Result<i64, DomainError> {
        let count: Option<(i64,)> =
            sqlx::query_as("SELECT subscriber_count FROM authors WHERE id = $1")
                .bind(author_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("read subscriber_count"))?;
        Ok(count.map(|(c,)| c).unwrap_or(0))
    }

    async fn author_ids(&self) -> Result<Vec<AuthorId>, DomainError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM authors ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list authors"))?;
        rows.into_iter()
            .map(|(id,)| AuthorId::new(id).map_err(|e| corrupt("author id", e)))
            .collect()
    }

    async fn reconcile_counter(&self, author_id: &AuthorId) -> Result<CounterReconciliation, DomainError> {
        let mut tx = self.begin().await?;

        // Locking the author row serializes against concurrent counter deltas.
        let recorded: Option<(i64,)> =
            sqlx::query_as("SELECT subscriber_count FROM authors WHERE id = $1 FOR UPDATE")
                .bind(author_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("lock author"))?;
        let Some((recorded,)) = recorded else {
            return Err(DomainError::new(
                ErrorCode::AuthorNotFound,
                format!("Author not found: {}", author_id),
            ));
        };

        let (actual,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subscriptions WHERE author_id = $1 AND status IN ('active', 'trial')",
        )
        .bind(author_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("count subscriptions"))?;

        if actual != recorded {
            sqlx::query("UPDATE authors SET subscriber_count = $2, updated_at = NOW() WHERE id = $1")
                .bind(author_id.as_str())
                .bind(actual)
                .execute(&mut *tx)
                .await
                .map_err(db_error("repair subscriber_count"))?;
        }
        tx.commit().await.map_err(db_error("commit reconciliation"))?;

        Ok(CounterReconciliation {
            author_id: author_id.clone(),
            recorded,
            actual,
        })
    }
}
