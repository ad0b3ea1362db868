//! ExpireSubscriptionHandler - Ends an elapsed period without renewal.
//!
//! Invoked by the expiration sweeper, never by clients. Safe to repeat: a
//! record that is no longer `active`/`trial` is skipped, so a second sweep
//! (or a sweep racing a cancel) never decrements the counter twice.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{Subscription, SubscriptionError, SubscriptionEvent};
use crate::ports::{Clock, EventPublisher, SubscriptionStore};

use super::support::{commit_transition, publish, Trigger};

/// Command to expire one subscription.
#[derive(Debug, Clone)]
pub struct ExpireSubscriptionCommand {
    pub subscription_id: SubscriptionId,
}

/// Result of an expire attempt.
#[derive(Debug, Clone)]
pub struct ExpireSubscriptionResult {
    pub subscription: Subscription,
    /// False when the record was skipped.
    pub expired: bool,
}

/// Handler for expiring subscriptions.
pub struct ExpireSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ExpireSubscriptionHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        event_publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            event_publisher,
            clock,
        }
    }

    pub async fn handle(
        &self,
        cmd: ExpireSubscriptionCommand,
    ) -> Result<ExpireSubscriptionResult, SubscriptionError> {
        let subscription = self
            .store
            .find_by_id(&cmd.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.subscription_id))?;

        let now = self.clock.now();
        let (subscription, expired) =
            commit_transition(self.store.as_ref(), subscription, |sub| {
                // Not due, already settled, or held by a renewing worker.
                if !sub.is_due(now) || sub.renewal_claim_active(now) {
                    return Ok(None);
                }
                sub.expire(now)?;
                Ok(Some(()))
            })
            .await?;

        if expired.is_none() {
            debug!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                "Expire skipped"
            );
            return Ok(ExpireSubscriptionResult {
                subscription,
                expired: false,
            });
        }

        info!(
            subscription_id = %subscription.id,
            author_id = %subscription.author_id,
            "Subscription expired"
        );
        publish(
            self.event_publisher.as_ref(),
            &Trigger::Sweeper,
            vec![SubscriptionEvent::Expired {
                subscription_id: subscription.id,
                author_id: subscription.author_id.clone(),
                occurred_at: now,
            }],
        )
        .await;

        Ok(ExpireSubscriptionResult {
            subscription,
            expired: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::testing::{at, Fixture};
    use crate::domain::subscription::{PlanType, SubscriptionStatus};

    fn expire(id: SubscriptionId) -> ExpireSubscriptionCommand {
        ExpireSubscriptionCommand {
            subscription_id: id,
        }
    }

    #[tokio::test]
    async fn elapsed_subscription_expires_and_releases_counter() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        fx.clock.set(at(2024, 2, 15));

        let result = fx.expire_handler().handle(expire(sub.id)).await.unwrap();

        assert!(result.expired);
        assert_eq!(result.subscription.status, SubscriptionStatus::Expired);
        assert_eq!(fx.count().await, 0);
        assert!(fx.events.has_event("subscription.expired.v1"));
    }

    #[tokio::test]
    async fn repeated_expire_decrements_once() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        fx.active("reader-2", PlanType::Monthly).await;
        fx.clock.set(at(2024, 3, 1));
        let handler = fx.expire_handler();

        assert!(handler.handle(expire(sub.id)).await.unwrap().expired);
        assert!(!handler.handle(expire(sub.id)).await.unwrap().expired);

        assert_eq!(fx.count().await, 1);
        assert_eq!(fx.events.events_of_type("subscription.expired.v1").len(), 1);
    }

    #[tokio::test]
    async fn period_not_elapsed_is_skipped() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        fx.clock.set(at(2024, 2, 14));

        let result = fx.expire_handler().handle(expire(sub.id)).await.unwrap();

        assert!(!result.expired);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn elapsed_trial_expires() {
        let fx = Fixture::with_trial(7);
        let sub = fx.trial("reader-1").await;
        assert_eq!(fx.count().await, 1);
        fx.clock.advance_days(7);

        let result = fx.expire_handler().handle(expire(sub.id)).await.unwrap();

        assert!(result.expired);
        assert_eq!(fx.count().await, 0);
    }
}
