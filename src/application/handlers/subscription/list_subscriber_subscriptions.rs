//! ListSubscriberSubscriptionsHandler - Query handler for a reader's subscriptions.

use std::sync::Arc;

use crate::domain::foundation::SubscriberId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{Clock, SubscriptionStore};

use super::SubscriptionSummary;

/// Query for every subscription a subscriber holds or held.
#[derive(Debug, Clone)]
pub struct ListSubscriberSubscriptionsQuery {
    pub subscriber_id: SubscriberId,
    /// Only subscriptions that currently grant access.
    pub active_only: bool,
}

/// Handler for listing a subscriber's subscriptions, oldest first.
pub struct ListSubscriberSubscriptionsHandler {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl ListSubscriberSubscriptionsHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn handle(
        &self,
        query: ListSubscriberSubscriptionsQuery,
    ) -> Result<Vec<SubscriptionSummary>, SubscriptionError> {
        let now = self.clock.now();
        let subscriptions = self.store.find_by_subscriber(&query.subscriber_id).await?;

        Ok(subscriptions
            .iter()
            .map(|s| SubscriptionSummary::from_subscription(s, now))
            .filter(|s| !query.active_only || s.has_access)
            .collect())
    }
}
