//! RenewSubscriptionHandler - Command handler for manual reactivation.
//!
//! A `cancelled` or `expired` subscription is first claimed into `pending`
//! (remembering where it came from), then charged at its snapshotted price.
//! A captured charge starts a fresh period and counts the subscriber again;
//! a failed one puts the record back where it was.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{
    PaymentReference, PlanCalculator, Subscription, SubscriptionError, SubscriptionEvent,
    SubscriptionStatus,
};
use crate::ports::{Clock, EventPublisher, PaymentGateway, SubscriptionStore};

use super::support::{
    charge, commit_transition, pending_charge_key, publish, report_unsettled_capture,
    ChargeOutcome, ChargePolicy, Trigger,
};

/// Command to reactivate a cancelled or expired subscription.
#[derive(Debug, Clone)]
pub struct RenewSubscriptionCommand {
    pub subscription_id: SubscriptionId,
    /// Replaces the stored token when the subscriber supplies a new card.
    pub payment_token: Option<String>,
}

/// Result of a successful manual renewal.
#[derive(Debug, Clone)]
pub struct RenewSubscriptionResult {
    pub subscription: Subscription,
    /// Present when the customer must authenticate before the renewal settles.
    pub redirect_url: Option<String>,
}

/// Handler for manual renewals.
pub struct RenewSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: ChargePolicy,
}

impl RenewSubscriptionHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: ChargePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            event_publisher,
            clock,
            policy,
        }
    }

    pub async fn handle(
        &self,
        cmd: RenewSubscriptionCommand,
    ) -> Result<RenewSubscriptionResult, SubscriptionError> {
        let new_token = match cmd.payment_token {
            Some(token) if token.trim().is_empty() => {
                return Err(SubscriptionError::validation(
                    "paymentToken",
                    "Payment token must not be blank",
                ));
            }
            token => token.map(|t| t.trim().to_string()),
        };

        // 1. Find the subscription
        let subscription = self
            .store
            .find_by_id(&cmd.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.subscription_id))?;

        // 2. Claim it into pending; only cancelled/expired records qualify.
        // Reopening fails with a conflict if the pair already has another
        // open subscription.
        let now = self.clock.now();
        let (claimed, _) = commit_transition(self.store.as_ref(), subscription, |sub| {
            sub.begin_renewal(now)?;
            if let Some(token) = &new_token {
                sub.payment_token = token.clone();
            }
            Ok(Some(()))
        })
        .await?;

        // 3. Charge under the key recorded by the claim; webhooks must echo it
        let idempotency_key = pending_charge_key(&claimed)?;
        let outcome = charge(self.gateway.as_ref(), &self.policy, &claimed, idempotency_key).await;

        // 4. Settle the claim
        let now = self.clock.now();
        let settled = commit_transition(self.store.as_ref(), claimed.clone(), |sub| {
            if sub.status != SubscriptionStatus::Pending || sub.renewal_from.is_none() {
                return Ok(None);
            }
            let event = match &outcome {
                ChargeOutcome::Captured { .. } => {
                    let period = PlanCalculator::period(now, sub.plan)?;
                    sub.renew(period, outcome.payment_reference(sub.price_cents, now), now)?;
                    Some(SubscriptionEvent::Renewed {
                        subscription_id: sub.id,
                        author_id: sub.author_id.clone(),
                        amount_cents: sub.price_cents,
                        new_period_start: sub.started_at,
                        new_period_end: sub.expires_at,
                        occurred_at: now,
                    })
                }
                ChargeOutcome::RequiresAction { payment_id, .. } => {
                    let payment = PaymentReference::awaiting_confirmation(
                        payment_id.clone(),
                        sub.price_cents,
                        now,
                    );
                    sub.await_confirmation(payment, now)?;
                    None
                }
                ChargeOutcome::Failed { reason, .. } => {
                    sub.fail_charge(outcome.payment_reference(sub.price_cents, now), now)?;
                    Some(SubscriptionEvent::RenewalFailed {
                        subscription_id: sub.id,
                        author_id: sub.author_id.clone(),
                        reason: reason.clone(),
                        occurred_at: now,
                    })
                }
            };
            Ok(Some(event))
        })
        .await;

        let (subscription, event) = match settled {
            Ok(settled) => settled,
            Err(err) => {
                if matches!(outcome, ChargeOutcome::Captured { .. }) {
                    error!(
                        subscription_id = %claimed.id,
                        error = %err,
                        "Renewal charge captured but not committed; needs reconciliation"
                    );
                }
                return Err(err);
            }
        };
        if event.is_none() {
            report_unsettled_capture(&subscription, &outcome);
        }
        publish(
            self.event_publisher.as_ref(),
            &Trigger::subscriber(&subscription),
            event.flatten().into_iter().collect(),
        )
        .await;

        // 5. Report
        match (subscription.status, outcome) {
            (SubscriptionStatus::Active, _) => {
                info!(
                    subscription_id = %subscription.id,
                    author_id = %subscription.author_id,
                    expires_at = %subscription.expires_at,
                    "Subscription renewed"
                );
                Ok(RenewSubscriptionResult {
                    subscription,
                    redirect_url: None,
                })
            }
            (SubscriptionStatus::Pending, ChargeOutcome::RequiresAction { redirect_url, .. }) => {
                Ok(RenewSubscriptionResult {
                    subscription,
                    redirect_url: Some(redirect_url),
                })
            }
            (status, outcome @ ChargeOutcome::Failed { .. }) => {
                warn!(subscription_id = %subscription.id, status = %status, "Renewal payment failed");
                Err(outcome.into_error(subscription.id))
            }
            (status, _) => Err(SubscriptionError::payment_failed(
                Some(subscription.id),
                format!("renewal settled as {}", status),
            )),
        }
    }
}
