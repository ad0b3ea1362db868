//! CancelStalePendingHandler - Fails charges whose confirmation never came.
//!
//! A subscription left `pending` longer than the confirmation window is
//! settled as a failed charge: a first purchase is cancelled, a manual
//! reactivation returns to the status it came from. Nothing is counted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{
    PaymentReference, Subscription, SubscriptionError, SubscriptionEvent, SubscriptionStatus,
    CONFIRMATION_TIMEOUT_REASON,
};
use crate::ports::{Clock, EventPublisher, SubscriptionStore};

use super::support::{commit_transition, publish, Trigger};

/// Command to time out one pending subscription.
#[derive(Debug, Clone)]
pub struct CancelStalePendingCommand {
    pub subscription_id: SubscriptionId,
}

/// Result of a stale-pending check.
#[derive(Debug, Clone)]
pub struct CancelStalePendingResult {
    pub subscription: Subscription,
    /// False when the record settled or was touched in the meantime.
    pub timed_out: bool,
}

/// Handler for pending subscriptions that outlived the confirmation window.
pub struct CancelStalePendingHandler {
    store: Arc<dyn SubscriptionStore>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    pending_timeout: Duration,
}

impl CancelStalePendingHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        event_publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            store,
            event_publisher,
            clock,
            pending_timeout,
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelStalePendingCommand,
    ) -> Result<CancelStalePendingResult, SubscriptionError> {
        let subscription = self
            .store
            .find_by_id(&cmd.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.subscription_id))?;

        let now = self.clock.now();
        let cutoff = now.minus_secs(self.pending_timeout.as_secs());
        let (subscription, event) = commit_transition(self.store.as_ref(), subscription, |sub| {
            if sub.status != SubscriptionStatus::Pending || !sub.updated_at.is_before(&cutoff) {
                return Ok(None);
            }
            let renewing = sub.renewal_from.is_some();
            let payment = PaymentReference::failed(
                sub.last_payment
                    .as_ref()
                    .and_then(|p| p.external_payment_id.clone()),
                sub.price_cents,
                CONFIRMATION_TIMEOUT_REASON,
                now,
            );
            sub.fail_charge(payment, now)?;
            let reason = CONFIRMATION_TIMEOUT_REASON.to_string();
            Ok(Some(if renewing {
                SubscriptionEvent::RenewalFailed {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    reason,
                    occurred_at: now,
                }
            } else {
                SubscriptionEvent::PaymentFailed {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    reason,
                    occurred_at: now,
                }
            }))
        })
        .await?;

        let Some(event) = event else {
            return Ok(CancelStalePendingResult {
                subscription,
                timed_out: false,
            });
        };

        if let Some(payment_id) = subscription
            .last_payment
            .as_ref()
            .and_then(|p| p.external_payment_id.as_deref())
        {
            // The gateway may still capture this payment later.
            warn!(
                subscription_id = %subscription.id,
                payment_id = %payment_id,
                "Unconfirmed payment timed out; check gateway for late capture"
            );
        }
        info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Stale pending subscription settled as failed"
        );
        publish(self.event_publisher.as_ref(), &Trigger::Sweeper, vec![event]).await;

        Ok(CancelStalePendingResult {
            subscription,
            timed_out: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stripe::MockCharge;
    use crate::application::handlers::subscription::testing::Fixture;
    use crate::domain::subscription::PlanType;

    fn stale(id: SubscriptionId) -> CancelStalePendingCommand {
        CancelStalePendingCommand {
            subscription_id: id,
        }
    }

    async fn awaiting_action(fx: &Fixture) -> Subscription {
        fx.gateway.push_outcome(MockCharge::RequireAction("https://3ds".into()));
        fx.create_handler()
            .handle(fx.command("reader-1", PlanType::Monthly))
            .await
            .unwrap()
            .subscription
    }

    #[tokio::test]
    async fn pending_past_timeout_is_cancelled() {
        let fx = Fixture::new();
        let sub = awaiting_action(&fx).await;
        fx.clock.advance_secs(fx.pending_timeout().as_secs() + 1);

        let result = fx.stale_pending_handler().handle(stale(sub.id)).await.unwrap();

        assert!(result.timed_out);
        assert_eq!(result.subscription.status, SubscriptionStatus::Cancelled);
        assert_eq!(
            result.subscription.cancellation_reason.as_deref(),
            Some("payment_failed: payment_confirmation_timeout")
        );
        assert_eq!(fx.count().await, 0);
        assert!(fx.events.has_event("subscription.payment_failed.v1"));
    }

    #[tokio::test]
    async fn pending_within_timeout_is_left_alone() {
        let fx = Fixture::new();
        let sub = awaiting_action(&fx).await;
        fx.clock.advance_secs(60);

        let result = fx.stale_pending_handler().handle(stale(sub.id)).await.unwrap();

        assert!(!result.timed_out);
        assert_eq!(result.subscription.status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn settled_subscription_is_left_alone() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;
        fx.clock.advance_days(2);

        let result = fx.stale_pending_handler().handle(stale(sub.id)).await.unwrap();

        assert!(!result.timed_out);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        assert_eq!(fx.count().await, 1);
    }
}
