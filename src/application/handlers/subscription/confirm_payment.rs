//! ConfirmPaymentHandler - Settles pending charges from gateway webhooks.
//!
//! Charges that needed customer action (3-D Secure) leave the subscription
//! `pending`. The gateway later posts a signed notification that either
//! captures the payment (activate, or renew for a pending reactivation) or
//! fails it. Notifications for records that are no longer pending are
//! acknowledged and ignored, which makes gateway retries harmless.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    PaymentReference, PlanCalculator, Subscription, SubscriptionError, SubscriptionEvent,
    SubscriptionStatus,
};
use crate::ports::{
    Clock, EventPublisher, NotificationOutcome, PaymentErrorCode, PaymentGateway,
    PaymentNotification, SubscriptionStore,
};

use super::support::{commit_transition, publish, Trigger};

/// Raw webhook delivery.
#[derive(Debug, Clone)]
pub struct ConfirmPaymentCommand {
    pub payload: Vec<u8>,
    pub signature: String,
}

/// Result of processing a webhook.
#[derive(Debug, Clone)]
pub enum ConfirmPaymentResult {
    /// The pending subscription was settled.
    Applied {
        subscription: Subscription,
        event_id: String,
    },
    /// Authentic, but nothing to do (other event type, unknown or settled record).
    Ignored { reason: String },
}

/// Handler for gateway payment notifications.
pub struct ConfirmPaymentHandler {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ConfirmPaymentHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            event_publisher,
            clock,
        }
    }

    pub async fn handle(
        &self,
        cmd: ConfirmPaymentCommand,
    ) -> Result<ConfirmPaymentResult, SubscriptionError> {
        // 1. Authenticate and parse
        let notification = self
            .gateway
            .verify_notification(&cmd.payload, &cmd.signature)
            .map_err(|e| match e.code {
                PaymentErrorCode::InvalidWebhook => {
                    warn!(error = %e.message, "Rejected payment webhook");
                    SubscriptionError::InvalidWebhookSignature
                }
                _ => SubscriptionError::infrastructure(e.to_string()),
            })?;

        let Some(notification) = notification else {
            return Ok(ignored("event type not handled"));
        };

        // 2. Find the subscription it refers to
        let Some(subscription) = self.store.find_by_id(&notification.subscription_id).await? else {
            warn!(
                subscription_id = %notification.subscription_id,
                event_id = %notification.event_id,
                "Payment webhook for unknown subscription"
            );
            return Ok(ignored("unknown subscription"));
        };

        // 3. Settle if it is still waiting on this payment
        let now = self.clock.now();
        let (subscription, event) = commit_transition(self.store.as_ref(), subscription, |sub| {
            if sub.status != SubscriptionStatus::Pending || !awaits(sub, &notification) {
                return Ok(None);
            }
            settle(sub, &notification, now).map(Some)
        })
        .await?;

        let Some(event) = event else {
            debug!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                event_id = %notification.event_id,
                "Payment webhook ignored, subscription not awaiting it"
            );
            return Ok(ignored("subscription not awaiting this payment"));
        };

        info!(
            subscription_id = %subscription.id,
            author_id = %subscription.author_id,
            event_id = %notification.event_id,
            status = %subscription.status,
            "Pending payment settled by webhook"
        );
        let trigger = Trigger::Webhook {
            event_id: notification.event_id.clone(),
        };
        publish(self.event_publisher.as_ref(), &trigger, vec![event]).await;

        Ok(ConfirmPaymentResult::Applied {
            subscription,
            event_id: notification.event_id,
        })
    }
}

fn ignored(reason: &str) -> ConfirmPaymentResult {
    ConfirmPaymentResult::Ignored {
        reason: reason.to_string(),
    }
}

/// True if the notification is for the charge the record is waiting on.
///
/// Either the charge key echoed from gateway metadata matches the current
/// attempt, or the payment id matches the one recorded for it. A notification
/// for an earlier attempt matches neither.
fn awaits(subscription: &Subscription, notification: &PaymentNotification) -> bool {
    let same_attempt = matches!(
        (&subscription.pending_charge_key, &notification.charge_key),
        (Some(expected), Some(received)) if expected == received
    );
    let same_payment = subscription
        .last_payment
        .as_ref()
        .and_then(|p| p.external_payment_id.as_deref())
        .is_some_and(|expected| expected == notification.external_payment_id);
    same_attempt || same_payment
}

fn settle(
    sub: &mut Subscription,
    notification: &PaymentNotification,
    now: Timestamp,
) -> Result<SubscriptionEvent, SubscriptionError> {
    let payment_id = notification.external_payment_id.clone();
    match &notification.outcome {
        NotificationOutcome::Succeeded { amount_cents } => {
            let payment = PaymentReference::captured(payment_id, *amount_cents, now);
            if sub.renewal_from.is_some() {
                let period = PlanCalculator::period(now, sub.plan)?;
                sub.renew(period, payment, now)?;
                Ok(SubscriptionEvent::Renewed {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    amount_cents: *amount_cents,
                    new_period_start: sub.started_at,
                    new_period_end: sub.expires_at,
                    occurred_at: now,
                })
            } else {
                sub.activate(payment, now)?;
                Ok(SubscriptionEvent::Activated {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    amount_cents: *amount_cents,
                    expires_at: sub.expires_at,
                    occurred_at: now,
                })
            }
        }
        NotificationOutcome::Failed { reason } => {
            let renewing = sub.renewal_from.is_some();
            let payment =
                PaymentReference::failed(Some(payment_id), sub.price_cents, reason.clone(), now);
            sub.fail_charge(payment, now)?;
            Ok(if renewing {
                SubscriptionEvent::RenewalFailed {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    reason: reason.clone(),
                    occurred_at: now,
                }
            } else {
                SubscriptionEvent::PaymentFailed {
                    subscription_id: sub.id,
                    author_id: sub.author_id.clone(),
                    reason: reason.clone(),
                    occurred_at: now,
                }
            })
        }
    }
}
