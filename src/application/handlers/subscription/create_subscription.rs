//! CreateSubscriptionHandler - Command handler for new subscriptions.
//!
//! The record is inserted as `pending` (uncounted) before the gateway is
//! called, so the one-open-per-pair check and the insert are one atomic
//! store operation and no lock is held during the charge.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::foundation::{AuthorId, SubscriberId, SubscriptionId};
use crate::domain::subscription::{
    DiscountCode, PaymentReference, PlanCalculator, PlanType, Subscription, SubscriptionError,
    SubscriptionEvent, SubscriptionStatus, SubscriptionTerms,
};
use crate::ports::{
    AuthorDirectory, Clock, DiscountValidation, DiscountValidator, EventPublisher, PaymentGateway,
    SubscriptionStore,
};

use super::support::{
    charge, commit_transition, pending_charge_key, publish, report_unsettled_capture,
    ChargeOutcome, ChargePolicy, Trigger,
};

/// Command to subscribe a reader to an author.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub subscriber_id: SubscriberId,
    pub author_id: AuthorId,
    pub plan: PlanType,
    /// Opaque gateway token; never raw card data.
    pub payment_token: String,
    pub discount_code: Option<DiscountCode>,
}

/// How the first payment went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Charge captured; the subscription is active.
    Captured,
    /// No charge yet; the subscription is in its free trial.
    TrialStarted,
    /// The customer must authenticate; the subscription stays pending.
    RequiresAction { redirect_url: String },
}

/// Result of successful subscription creation.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionResult {
    pub subscription: Subscription,
    pub payment: PaymentOutcome,
}

impl CreateSubscriptionResult {
    pub fn redirect_url(&self) -> Option<&str> {
        match &self.payment {
            PaymentOutcome::RequiresAction { redirect_url } => Some(redirect_url),
            _ => None,
        }
    }
}

/// Handler for creating subscriptions.
///
/// A declined, errored or timed-out charge leaves the record `cancelled`
/// with a system reason and returns a payment error carrying its id.
pub struct CreateSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    authors: Arc<dyn AuthorDirectory>,
    discounts: Arc<dyn DiscountValidator>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: ChargePolicy,
}

impl CreateSubscriptionHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn PaymentGateway>,
        authors: Arc<dyn AuthorDirectory>,
        discounts: Arc<dyn DiscountValidator>,
        event_publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: ChargePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            authors,
            discounts,
            event_publisher,
            clock,
            policy,
        }
    }

    pub async fn handle(
        &self,
        cmd: CreateSubscriptionCommand,
    ) -> Result<CreateSubscriptionResult, SubscriptionError> {
        // 1. Validate input that the types do not already guarantee
        if cmd.payment_token.trim().is_empty() {
            return Err(SubscriptionError::validation("paymentToken", "Payment token is required"));
        }

        // 2. Resolve the author's current price for this plan
        let pricing = self
            .authors
            .pricing(&cmd.author_id)
            .await?
            .ok_or_else(|| SubscriptionError::author_not_found(cmd.author_id.clone()))?;
        let base_price = pricing.price_for(cmd.plan).ok_or_else(|| {
            SubscriptionError::invalid_plan(format!(
                "author {} does not offer a {} plan",
                cmd.author_id, cmd.plan
            ))
        })?;

        // 3. Apply the discount code, if any
        let discount_percent = match &cmd.discount_code {
            Some(code) => match self.discounts.validate(code, &cmd.author_id).await? {
                DiscountValidation::Valid { percent } => Some(percent),
                DiscountValidation::Invalid(reason) => {
                    return Err(SubscriptionError::invalid_discount(code.as_str(), reason));
                }
            },
            None => None,
        };
        let price_cents = discount_percent
            .map(|p| p.reduce(base_price))
            .unwrap_or(base_price);

        // 4. Build the record: trial for first-time subscribers, else pending
        let now = self.clock.now();
        let terms = SubscriptionTerms {
            subscriber_id: cmd.subscriber_id.clone(),
            author_id: cmd.author_id.clone(),
            plan: cmd.plan,
            price_cents,
            discount_percent,
            payment_token: cmd.payment_token.trim().to_string(),
        };
        let offers_trial = pricing.trial_days > 0 && cmd.plan.is_recurring();
        let first_time = offers_trial
            && !self
                .store
                .has_subscribed_before(&cmd.subscriber_id, &cmd.author_id)
                .await?;

        let id = SubscriptionId::new();
        let draft = if first_time {
            Subscription::new_trial(id, terms, pricing.trial_days, now)
        } else {
            let period = PlanCalculator::period(now, cmd.plan)?;
            Subscription::new_pending(id, terms, period, now)
        };

        // 5. Insert; duplicate check and counter delta are one store operation
        let subscription = self.store.insert(&draft).await?;
        let created = SubscriptionEvent::Created {
            subscription_id: subscription.id,
            subscriber_id: subscription.subscriber_id.clone(),
            author_id: subscription.author_id.clone(),
            plan: subscription.plan,
            price_cents: subscription.price_cents,
            trial: subscription.status == SubscriptionStatus::Trial,
            occurred_at: now,
        };

        if subscription.status == SubscriptionStatus::Trial {
            info!(
                subscription_id = %subscription.id,
                author_id = %subscription.author_id,
                trial_days = pricing.trial_days,
                "Trial subscription started"
            );
            publish(
                self.event_publisher.as_ref(),
                &Trigger::subscriber(&subscription),
                vec![created],
            )
            .await;
            return Ok(CreateSubscriptionResult {
                subscription,
                payment: PaymentOutcome::TrialStarted,
            });
        }

        // 6. Charge outside any store lock
        let idempotency_key = pending_charge_key(&subscription)?;
        let outcome = charge(
            self.gateway.as_ref(),
            &self.policy,
            &subscription,
            idempotency_key,
        )
        .await;

        // 7. Settle the pending record against the outcome
        let now = self.clock.now();
        let settled = commit_transition(self.store.as_ref(), subscription.clone(), |sub| {
            if sub.status != SubscriptionStatus::Pending || sub.renewal_from.is_some() {
                return Ok(None);
            }
            let event = match &outcome {
                ChargeOutcome::Captured { .. } => {
                    sub.activate(outcome.payment_reference(sub.price_cents, now), now)?;
                    Some(SubscriptionEvent::Activated {
                        subscription_id: sub.id,
                        author_id: sub.author_id.clone(),
                        amount_cents: sub.price_cents,
                        expires_at: sub.expires_at,
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
                    Some(SubscriptionEvent::PaymentFailed {
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
                        subscription_id = %subscription.id,
                        error = %err,
                        "Charge captured but activation was not committed; needs reconciliation"
                    );
                }
                return Err(err);
            }
        };
        if event.is_none() {
            report_unsettled_capture(&subscription, &outcome);
        }

        let mut events = vec![created];
        events.extend(event.flatten());
        publish(self.event_publisher.as_ref(), &Trigger::subscriber(&subscription), events).await;

        // 8. Report the settled state; payment failures are never swallowed.
        // A webhook may have settled the record first, so read the status.
        match (subscription.status, outcome) {
            (SubscriptionStatus::Active, _) => {
                info!(
                    subscription_id = %subscription.id,
                    author_id = %subscription.author_id,
                    plan = %subscription.plan,
                    amount_cents = subscription.price_cents,
                    "Subscription activated"
                );
                Ok(CreateSubscriptionResult {
                    subscription,
                    payment: PaymentOutcome::Captured,
                })
            }
            (SubscriptionStatus::Pending, ChargeOutcome::RequiresAction { redirect_url, .. }) => {
                info!(subscription_id = %subscription.id, "Charge awaiting customer confirmation");
                Ok(CreateSubscriptionResult {
                    subscription,
                    payment: PaymentOutcome::RequiresAction { redirect_url },
                })
            }
            (status, outcome @ ChargeOutcome::Failed { .. }) => {
                warn!(
                    subscription_id = %subscription.id,
                    status = %status,
                    "Subscription not activated: payment failed"
                );
                Err(outcome.into_error(subscription.id))
            }
            (status, _) => {
                let reason = subscription
                    .cancellation_reason
                    .clone()
                    .unwrap_or_else(|| format!("subscription is {}", status));
                Err(SubscriptionError::payment_failed(Some(subscription.id), reason))
            }
        }
    }
}
