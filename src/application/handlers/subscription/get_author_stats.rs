//! GetAuthorStatsHandler - Query handler for an author's revenue figures.
//!
//! Figures are recomputed from one snapshot of the author's subscriptions
//! on every call; they hold no state that could drift.

use std::sync::Arc;

use tracing::debug;

use crate::domain::foundation::AuthorId;
use crate::domain::subscription::{AuthorStats, RevenueAccountant, SubscriptionError};
use crate::ports::{AuthorDirectory, SubscriptionStore};

/// Query for an author's subscription statistics.
#[derive(Debug, Clone)]
pub struct GetAuthorStatsQuery {
    pub author_id: AuthorId,
}

/// Handler for author statistics.
pub struct GetAuthorStatsHandler {
    store: Arc<dyn SubscriptionStore>,
    authors: Arc<dyn AuthorDirectory>,
}

impl GetAuthorStatsHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, authors: Arc<dyn AuthorDirectory>) -> Self {
        Self { store, authors }
    }

    pub async fn handle(&self, query: GetAuthorStatsQuery) -> Result<AuthorStats, SubscriptionError> {
        if self.authors.pricing(&query.author_id).await?.is_none() {
            return Err(SubscriptionError::author_not_found(query.author_id));
        }

        let subscriptions = self.store.find_by_author(&query.author_id).await?;
        let stats = RevenueAccountant::stats(&subscriptions);
        debug!(
            author_id = %query.author_id,
            total = stats.total_subscriptions,
            active = stats.active_subscriptions,
            "Author stats computed"
        );
        Ok(stats)
    }
}
