//! Subscription store port.
//!
//! Persists Subscription records together with each author's
//! `subscriber_count`. The counter is a projection of the records: the
//! store derives the delta from the stored status and the new status and
//! applies both in one atomic unit. Callers never pass a delta.
//!
//! # Concurrency
//!
//! - `insert` performs the duplicate check and the insert atomically
//! - `update` is compare-and-set on `Subscription::version`; a stale write
//!   returns `UpdateOutcome::Stale` and changes nothing
//! - `find_by_author` reads one consistent snapshot

use async_trait::async_trait;

use crate::domain::foundation::{AuthorId, DomainError, SubscriberId, SubscriptionId, Timestamp};
use crate::domain::subscription::Subscription;

/// Store port for subscriptions and author counters.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new subscription.
    ///
    /// If the subscription is counted (e.g. a trial) the author's counter
    /// is incremented in the same unit.
    ///
    /// # Errors
    ///
    /// - `DuplicateSubscription` if the pair already has a `pending`,
    ///   `active` or `trial` subscription; nothing is written
    /// - `CounterInconsistency` if the counter could not be applied
    async fn insert(&self, subscription: &Subscription) -> Result<Subscription, DomainError>;

    /// Write `subscription` if the stored version still equals
    /// `subscription.version`, applying the counter delta implied by the
    /// status change. The returned record carries the bumped version.
    async fn update(&self, subscription: &Subscription) -> Result<UpdateOutcome, DomainError>;

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    async fn find_by_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// All of an author's subscriptions, any status, from one snapshot.
    async fn find_by_author(&self, author_id: &AuthorId) -> Result<Vec<Subscription>, DomainError>;

    /// Returns true if the subscriber ever held a subscription to the author
    /// that gave access (see `Subscription::ever_counted`). Declined or
    /// abandoned first purchases do not count.
    async fn has_subscribed_before(
        &self,
        subscriber_id: &SubscriberId,
        author_id: &AuthorId,
    ) -> Result<bool, DomainError>;

    /// `active`/`trial` subscriptions with `expires_at <= now`, oldest first.
    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError>;

    /// `pending` subscriptions last touched before `older_than`.
    async fn find_stale_pending(
        &self,
        older_than: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Current maintained `subscriber_count` for the author (0 if unknown).
    async fn subscriber_count(&self, author_id: &AuthorId) -> Result<i64, DomainError>;

    /// Authors that have at least one subscription or a counter row.
    async fn author_ids(&self) -> Result<Vec<AuthorId>, DomainError>;

    /// Recompute the author's counter from the records and overwrite it.
    async fn reconcile_counter(&self, author_id: &AuthorId) -> Result<CounterReconciliation, DomainError>;
}

/// Result of a compare-and-set update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(Subscription),
    /// Another writer got there first; re-read and decide again.
    Stale,
}

/// Outcome of recomputing one author's counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReconciliation {
    pub author_id: AuthorId,
    /// Value held before reconciliation.
    pub recorded: i64,
    /// Count of `active`/`trial` records.
    pub actual: i64,
}

impl CounterReconciliation {
    pub fn drift(&self) -> i64 {
        self.actual - self.recorded
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}
