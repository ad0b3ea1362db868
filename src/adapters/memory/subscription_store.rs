//! In-memory subscription store.
//!
//! Records and counters sit behind one mutex, so every operation is a
//! single atomic unit: the duplicate check happens under the same lock as
//! the insert, and a status write never becomes visible without its
//! counter delta. Used by tests and by local development without Postgres.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::domain::foundation::{
    AuthorId, DomainError, ErrorCode, SubscriberId, SubscriptionId, Timestamp,
};
use crate::domain::subscription::Subscription;
use crate::ports::{CounterReconciliation, SubscriptionStore, UpdateOutcome};

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    counters: HashMap<AuthorId, i64>,
}

/// Mutex-guarded store of subscriptions and author counters.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    state: Mutex<State>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites an author's counter without touching records.
    ///
    /// Only useful for exercising reconciliation against injected drift.
    pub fn overwrite_counter(&self, author_id: &AuthorId, value: i64) -> Result<(), DomainError> {
        self.lock()?.counters.insert(author_id.clone(), value);
        Ok(())
    }

    /// Number of stored records, any status.
    pub fn len(&self) -> Result<usize, DomainError> {
        Ok(self.lock()?.subscriptions.len())
    }

    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DomainError> {
        self.state
            .lock()
            .map_err(|_| DomainError::new(ErrorCode::InternalError, "Subscription store lock poisoned"))
    }
}

fn counted(subscription: &Subscription) -> i64 {
    i64::from(subscription.status.is_counted())
}

fn reject_second_open(state: &State, subscription: &Subscription) -> Result<(), DomainError> {
    let duplicate = state.subscriptions.values().any(|s| {
        s.id != subscription.id
            && s.subscriber_id == subscription.subscriber_id
            && s.author_id == subscription.author_id
            && s.status.is_open()
    });
    if duplicate {
        return Err(DomainError::new(
            ErrorCode::DuplicateSubscription,
            "Subscriber already has an open subscription to this author",
        )
        .with_detail("subscriber_id", subscription.subscriber_id.as_str())
        .with_detail("author_id", subscription.author_id.as_str()));
    }
    Ok(())
}

fn apply_delta(state: &mut State, author_id: &AuthorId, delta: i64) -> Result<(), DomainError> {
    if delta == 0 {
        return Ok(());
    }
    let current = state.counters.get(author_id).copied().unwrap_or(0);
    let next = current + delta;
    if next < 0 {
        return Err(DomainError::new(
            ErrorCode::CounterInconsistency,
            format!("subscriber_count for author {} would become {}", author_id, next),
        )
        .with_detail("author_id", author_id.as_str()));
    }
    state.counters.insert(author_id.clone(), next);
    Ok(())
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<Subscription, DomainError> {
        let mut state = self.lock()?;

        reject_second_open(&state, subscription)?;
        if state.subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                format!("Subscription {} already stored", subscription.id),
            ));
        }

        apply_delta(&mut state, &subscription.author_id, counted(subscription))?;
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    async fn update(&self, subscription: &Subscription) -> Result<UpdateOutcome, DomainError> {
        let mut state = self.lock()?;

        let stored = state
            .subscriptions
            .get(&subscription.id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription not found: {}", subscription.id),
                )
            })?;

        if stored.version != subscription.version {
            return Ok(UpdateOutcome::Stale);
        }
        if stored.author_id != subscription.author_id
            || stored.subscriber_id != subscription.subscriber_id
        {
            return Err(DomainError::validation(
                "subscription",
                "Subscriber and author are immutable",
            ));
        }

        if subscription.status.is_open() && !stored.status.is_open() {
            reject_second_open(&state, subscription)?;
        }

        let delta = counted(subscription) - counted(stored);
        apply_delta(&mut state, &subscription.author_id, delta)?;

        let mut written = subscription.clone();
        written.version += 1;
        state.subscriptions.insert(written.id, written.clone());
        Ok(UpdateOutcome::Applied(written))
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.lock()?.subscriptions.get(id).cloned())
    }

    async fn find_by_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.lock()?;
        let mut found: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| &s.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn find_by_author(&self, author_id: &AuthorId) -> Result<Vec<Subscription>, DomainError> {
        let state = self.lock()?;
        let mut found: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| &s.author_id == author_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn has_subscribed_before(
        &self,
        subscriber_id: &SubscriberId,
        author_id: &AuthorId,
    ) -> Result<bool, DomainError> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .any(|s| {
                &s.subscriber_id == subscriber_id && &s.author_id == author_id && s.ever_counted()
            }))
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        let state = self.lock()?;
        let mut due: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.expires_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find_stale_pending(
        &self,
        older_than: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.lock()?;
        let mut stale: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.status == crate::domain::subscription::SubscriptionStatus::Pending
                    && s.updated_at.is_before(&older_than)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn subscriber_count(&self, author_id: &AuthorId) -> Result<i64, DomainError> {
        Ok(self.lock()?.counters.get(author_id).copied().unwrap_or(0))
    }

    async fn author_ids(&self) -> Result<Vec<AuthorId>, DomainError> {
        let state = self.lock()?;
        let ids: HashSet<AuthorId> = state
            .subscriptions
            .values()
            .map(|s| s.author_id.clone())
            .chain(state.counters.keys().cloned())
            .collect();
        let mut ids: Vec<_> = ids.into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    async fn reconcile_counter(&self, author_id: &AuthorId) -> Result<CounterReconciliation, DomainError> {
        let mut state = self.lock()?;
        let actual = state
            .subscriptions
            .values()
            .filter(|s| &s.author_id == author_id && s.status.is_counted())
            .count() as i64;
        let recorded = state.counters.insert(author_id.clone(), actual).unwrap_or(0);
        Ok(CounterReconciliation {
            author_id: author_id.clone(),
            recorded,
            actual,
        })
    }
}
