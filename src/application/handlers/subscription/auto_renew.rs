//! AutoRenewSubscriptionHandler - Sweeper-driven renewal of elapsed periods.
//!
//! The worker first writes a renewal claim (status and counter untouched),
//! so a concurrent cancel or a second sweeper sees the record is taken.
//! It then charges and either starts the next period (`Active`, already
//! counted, no increment) or expires the record on failure.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::foundation::SubscriptionId;
use crate::domain::subscription::{
    PlanCalculator, Subscription, SubscriptionError, SubscriptionEvent,
};
use crate::ports::{Clock, EventPublisher, PaymentGateway, SubscriptionStore};

use super::support::{charge, commit_transition, publish, ChargeOutcome, ChargePolicy, Trigger};

/// Command to auto-renew one subscription whose period has elapsed.
#[derive(Debug, Clone)]
pub struct AutoRenewSubscriptionCommand {
    pub subscription_id: SubscriptionId,
}

/// What happened to the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Charged; a new period started.
    Renewed,
    /// Charge failed; the subscription expired.
    Failed { reason: String },
    /// Auto-renewal is off; the caller should expire it instead.
    NotRenewable,
    /// Not due, already handled, or claimed by another worker.
    Skipped,
}

/// Result of an auto-renewal attempt.
#[derive(Debug, Clone)]
pub struct AutoRenewSubscriptionResult {
    pub subscription: Subscription,
    pub outcome: RenewalOutcome,
}

/// Handler for sweeper renewals.
pub struct AutoRenewSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: ChargePolicy,
}

impl AutoRenewSubscriptionHandler {
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
        cmd: AutoRenewSubscriptionCommand,
    ) -> Result<AutoRenewSubscriptionResult, SubscriptionError> {
        let subscription = self
            .store
            .find_by_id(&cmd.subscription_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.subscription_id))?;

        // 1. Claim the elapsed period
        let now = self.clock.now();
        let (claimed, claim) = commit_transition(self.store.as_ref(), subscription, |sub| {
            if !sub.is_due(now) || !sub.auto_renewal || sub.renewal_claim_active(now) {
                return Ok(None);
            }
            sub.claim_renewal(now)?;
            Ok(Some(()))
        })
        .await?;

        if claim.is_none() {
            let outcome = if claimed.is_due(now) && !claimed.auto_renewal {
                RenewalOutcome::NotRenewable
            } else {
                RenewalOutcome::Skipped
            };
            return Ok(AutoRenewSubscriptionResult {
                subscription: claimed,
                outcome,
            });
        }

        // 2. Charge; one key per elapsed period so a retried sweep never double-charges
        let idempotency_key = format!(
            "renewal-{}-{}",
            claimed.id,
            claimed.expires_at.as_unix_secs()
        );
        let outcome = charge(self.gateway.as_ref(), &self.policy, &claimed, idempotency_key).await;

        // 3. Settle while the claim is still ours
        let claimed_at = claimed.renewal_claimed_at;
        let now = self.clock.now();
        let settled = commit_transition(self.store.as_ref(), claimed.clone(), |sub| {
            if sub.renewal_claimed_at != claimed_at || !sub.status.is_counted() {
                return Ok(None);
            }
            match &outcome {
                ChargeOutcome::Captured { .. } => {
                    let period = PlanCalculator::period(now, sub.plan)?;
                    sub.renew(period, outcome.payment_reference(sub.price_cents, now), now)?;
                    Ok(Some(SubscriptionEvent::Renewed {
                        subscription_id: sub.id,
                        author_id: sub.author_id.clone(),
                        amount_cents: sub.price_cents,
                        new_period_start: sub.started_at,
                        new_period_end: sub.expires_at,
                        occurred_at: now,
                    }))
                }
                // Off-session renewals cannot wait for the customer.
                ChargeOutcome::RequiresAction { .. } | ChargeOutcome::Failed { .. } => {
                    let payment = outcome.payment_reference(sub.price_cents, now);
                    let reason = payment.failure_reason.clone().unwrap_or_default();
                    sub.fail_charge(payment, now)?;
                    Ok(Some(SubscriptionEvent::RenewalFailed {
                        subscription_id: sub.id,
                        author_id: sub.author_id.clone(),
                        reason,
                        occurred_at: now,
                    }))
                }
            }
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

        let Some(event) = event else {
            // Claim lapsed and someone else moved the record on.
            if matches!(outcome, ChargeOutcome::Captured { .. }) {
                error!(
                    subscription_id = %subscription.id,
                    status = %subscription.status,
                    "Renewal charge captured after claim was lost; needs reconciliation"
                );
            }
            return Ok(AutoRenewSubscriptionResult {
                subscription,
                outcome: RenewalOutcome::Skipped,
            });
        };

        let result_outcome = match &event {
            SubscriptionEvent::Renewed { .. } => {
                info!(
                    subscription_id = %subscription.id,
                    author_id = %subscription.author_id,
                    expires_at = %subscription.expires_at,
                    "Subscription auto-renewed"
                );
                RenewalOutcome::Renewed
            }
            SubscriptionEvent::RenewalFailed { reason, .. } => {
                warn!(
                    subscription_id = %subscription.id,
                    author_id = %subscription.author_id,
                    reason = %reason,
                    "Auto-renewal failed, subscription expired"
                );
                RenewalOutcome::Failed {
                    reason: reason.clone(),
                }
            }
            _ => RenewalOutcome::Skipped,
        };
        publish(self.event_publisher.as_ref(), &Trigger::Sweeper, vec![event]).await;

        Ok(AutoRenewSubscriptionResult {
            subscription,
            outcome: result_outcome,
        })
    }
}
