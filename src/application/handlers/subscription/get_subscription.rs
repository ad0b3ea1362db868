//! GetSubscriptionHandler - Query handler for a single subscription.

use std::sync::Arc;

use crate::domain::foundation::{AuthorId, Percentage, SubscriberId, SubscriptionId, Timestamp};
use crate::domain::subscription::{PlanType, Subscription, SubscriptionError, SubscriptionStatus};
use crate::ports::{Clock, SubscriptionStore};

/// Query to get a subscription by id.
#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub subscription_id: SubscriptionId,
}

/// Read model of a subscription. Omits the payment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    pub id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    pub author_id: AuthorId,
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub price_cents: i64,
    pub discount_percent: Option<Percentage>,
    pub started_at: Timestamp,
    pub expires_at: Timestamp,
    pub next_billing_date: Option<Timestamp>,
    pub trial_expires_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub cancellation_reason: Option<String>,
    pub auto_renewal: bool,
    pub total_paid_cents: i64,
    pub last_payment_id: Option<String>,
    pub has_access: bool,
}

impl SubscriptionSummary {
    pub fn from_subscription(subscription: &Subscription, now: Timestamp) -> Self {
        Self {
            id: subscription.id,
            subscriber_id: subscription.subscriber_id.clone(),
            author_id: subscription.author_id.clone(),
            plan: subscription.plan,
            status: subscription.status,
            price_cents: subscription.price_cents,
            discount_percent: subscription.discount_percent,
            started_at: subscription.started_at,
            expires_at: subscription.expires_at,
            next_billing_date: subscription.next_billing_date,
            trial_expires_at: subscription.trial_expires_at,
            cancelled_at: subscription.cancelled_at,
            cancellation_reason: subscription.cancellation_reason.clone(),
            auto_renewal: subscription.auto_renewal,
            total_paid_cents: subscription.total_paid_cents,
            last_payment_id: subscription
                .last_payment
                .as_ref()
                .and_then(|p| p.external_payment_id.clone()),
            has_access: subscription.has_access(now),
        }
    }
}

/// Handler for getting one subscription.
pub struct GetSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl GetSubscriptionHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<SubscriptionSummary, SubscriptionError> {
        let subscription = self
            .store
            .find_by_id(&query.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(query.subscription_id))?;

        Ok(SubscriptionSummary::from_subscription(
            &subscription,
            self.clock.now(),
        ))
    }
}
