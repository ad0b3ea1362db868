//! CancelSubscriptionHandler - Command handler for cancelling subscriptions.

use std::sync::Arc;

use tracing::info;

use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{
    CancelEffect, Subscription, SubscriptionError, SubscriptionEvent,
};
use crate::ports::{Clock, EventPublisher, SubscriptionStore};

use super::support::{commit_transition, publish, Trigger};

/// Command to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub subscription_id: SubscriptionId,
    pub reason: Option<String>,
    /// `false` keeps access until the paid period ends.
    pub immediately: bool,
}

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription: Subscription,
    pub effect: CancelEffect,
}

/// Handler for cancelling subscriptions.
///
/// Immediate cancellation releases the author's counter in the same store
/// write. Cancel-at-period-end only switches auto-renewal off; the sweeper
/// expires the record when its period elapses. Repeating a cancel returns
/// the current state unchanged.
pub struct CancelSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl CancelSubscriptionHandler {
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
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, SubscriptionError> {
        let reason = cmd
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        // 1. Find the subscription
        let subscription = self
            .store
            .find_by_id(&cmd.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.subscription_id))?;

        // 2. Cancel against the latest stored state
        let now = self.clock.now();
        let (subscription, effect) =
            commit_transition(self.store.as_ref(), subscription, |sub| {
                match sub.cancel(reason.clone(), cmd.immediately, now)? {
                    CancelEffect::Unchanged => Ok(None),
                    effect => Ok(Some(effect)),
                }
            })
            .await?;

        // 3. Publish what changed
        let effect = effect.unwrap_or(CancelEffect::Unchanged);
        let event = match effect {
            CancelEffect::Cancelled => Some(SubscriptionEvent::Cancelled {
                subscription_id: subscription.id,
                author_id: subscription.author_id.clone(),
                reason: subscription.cancellation_reason.clone(),
                occurred_at: now,
            }),
            CancelEffect::ScheduledAtPeriodEnd => Some(SubscriptionEvent::CancellationScheduled {
                subscription_id: subscription.id,
                author_id: subscription.author_id.clone(),
                effective_at: subscription.expires_at,
                occurred_at: now,
            }),
            CancelEffect::Unchanged => None,
        };
        if let Some(event) = event {
            info!(
                subscription_id = %subscription.id,
                author_id = %subscription.author_id,
                immediately = cmd.immediately,
                "Subscription cancellation recorded"
            );
            publish(
                self.event_publisher.as_ref(),
                &Trigger::subscriber(&subscription),
                vec![event],
            )
            .await;
        }

        Ok(CancelSubscriptionResult {
            subscription,
            effect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::testing::Fixture;
    use crate::domain::subscription::{PlanType, SubscriptionStatus};

    fn cancel(id: SubscriptionId, immediately: bool) -> CancelSubscriptionCommand {
        CancelSubscriptionCommand {
            subscription_id: id,
            reason: Some("too expensive".to_string()),
            immediately,
        }
    }

    #[tokio::test]
    async fn immediate_cancel_releases_counter() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        assert_eq!(fx.count().await, 1);

        let result = fx.cancel_handler().handle(cancel(sub.id, true)).await.unwrap();

        assert_eq!(result.effect, CancelEffect::Cancelled);
        assert_eq!(result.subscription.status, SubscriptionStatus::Cancelled);
        assert_eq!(result.subscription.cancelled_at, Some(fx.clock.now()));
        assert!(!result.subscription.auto_renewal);
        assert_eq!(result.subscription.cancellation_reason.as_deref(), Some("too expensive"));
        assert_eq!(fx.count().await, 0);
        assert!(fx.events.has_event("subscription.cancelled.v1"));
    }

    #[tokio::test]
    async fn cancel_at_period_end_keeps_access_and_counter() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;

        let result = fx.cancel_handler().handle(cancel(sub.id, false)).await.unwrap();

        assert_eq!(result.effect, CancelEffect::ScheduledAtPeriodEnd);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        assert!(!result.subscription.auto_renewal);
        assert!(result.subscription.has_access(fx.clock.now()));
        assert_eq!(fx.count().await, 1);
        assert!(fx.events.has_event("subscription.cancellation_scheduled.v1"));
    }

    #[tokio::test]
    async fn second_cancel_is_a_no_op() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        let handler = fx.cancel_handler();

        let first = handler.handle(cancel(sub.id, true)).await.unwrap();
        let second = handler.handle(cancel(sub.id, true)).await.unwrap();

        assert_eq!(second.effect, CancelEffect::Unchanged);
        assert_eq!(second.subscription, first.subscription);
        assert_eq!(fx.count().await, 0);
        assert_eq!(fx.events.events_of_type("subscription.cancelled.v1").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cancels_decrement_once() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        let handler = Arc::new(fx.cancel_handler());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(cancel(sub.id, true)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fx.count().await, 0);
        assert_eq!(fx.events.events_of_type("subscription.cancelled.v1").len(), 1);
    }

    #[tokio::test]
    async fn cancel_pending_is_rejected() {
        let fx = Fixture::new();
        let sub = fx.pending("reader-1").await;

        let err = fx.cancel_handler().handle(cancel(sub.id, true)).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn cancel_unknown_subscription_is_not_found() {
        let fx = Fixture::new();
        let err = fx
            .cancel_handler()
            .handle(cancel(SubscriptionId::new(), true))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::NotFound(_)));
    }

    #[tokio::test]
    async fn blank_reason_is_dropped() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;

        let result = fx
            .cancel_handler()
            .handle(CancelSubscriptionCommand {
                subscription_id: sub.id,
                reason: Some("   ".to_string()),
                immediately: true,
            })
            .await
            .unwrap();
        assert_eq!(result.subscription.cancellation_reason, None);
    }
}
