//! Plumbing shared by the subscription command handlers.
//!
//! - `commit_transition` - compare-and-set loop over `SubscriptionStore::update`
//! - `charge` - one gateway call bounded by the configured timeout
//! - `publish` - post-commit event delivery that never fails the command

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::PaymentConfig;
use crate::domain::foundation::{SerializableDomainEvent, SubscriptionId, Timestamp};
use crate::domain::subscription::{
    PaymentReference, Subscription, SubscriptionError, SubscriptionEvent,
};
use crate::ports::{ChargeRequest, EventPublisher, PaymentGateway, SubscriptionStore, UpdateOutcome};

/// Attempts before a contended transition gives up with `ConcurrentModification`.
pub(crate) const MAX_TRANSITION_ATTEMPTS: usize = 5;

/// Reason recorded when an off-session renewal asks for customer action.
pub(crate) const ACTION_REQUIRED_REASON: &str = "requires_customer_action";

/// How the handlers talk to the payment gateway.
#[derive(Debug, Clone)]
pub struct ChargePolicy {
    /// ISO 4217 code sent with every charge.
    pub currency: String,
    /// Upper bound on one gateway call; elapsed calls fail closed.
    pub timeout: Duration,
}

impl ChargePolicy {
    pub fn new(currency: impl Into<String>, timeout: Duration) -> Self {
        Self {
            currency: currency.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(config.currency.clone(), config.charge_timeout())
    }
}

impl Default for ChargePolicy {
    fn default() -> Self {
        Self::new("USD", Duration::from_secs(30))
    }
}

/// Result of one gateway call, already classified for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChargeOutcome {
    Captured {
        payment_id: String,
    },
    RequiresAction {
        payment_id: String,
        redirect_url: String,
    },
    Failed {
        payment_id: Option<String>,
        reason: String,
        timed_out: bool,
    },
}

impl ChargeOutcome {
    /// Payment reference recorded on the subscription for this outcome.
    ///
    /// `RequiresAction` is recorded as a failure; callers that can wait for
    /// confirmation use `PaymentReference::awaiting_confirmation` instead.
    pub(crate) fn payment_reference(&self, amount_cents: i64, now: Timestamp) -> PaymentReference {
        match self {
            ChargeOutcome::Captured { payment_id } => {
                PaymentReference::captured(payment_id.clone(), amount_cents, now)
            }
            ChargeOutcome::RequiresAction { payment_id, .. } => PaymentReference::failed(
                Some(payment_id.clone()),
                amount_cents,
                ACTION_REQUIRED_REASON,
                now,
            ),
            ChargeOutcome::Failed {
                payment_id, reason, ..
            } => PaymentReference::failed(payment_id.clone(), amount_cents, reason.clone(), now),
        }
    }

    /// Error surfaced to the caller for a failed outcome.
    pub(crate) fn into_error(self, subscription_id: SubscriptionId) -> SubscriptionError {
        match self {
            ChargeOutcome::Failed { timed_out: true, .. } => SubscriptionError::PaymentTimeout {
                subscription_id: Some(subscription_id),
            },
            ChargeOutcome::Failed { reason, .. } => {
                SubscriptionError::payment_failed(Some(subscription_id), reason)
            }
            ChargeOutcome::RequiresAction { .. } => {
                SubscriptionError::payment_failed(Some(subscription_id), ACTION_REQUIRED_REASON)
            }
            ChargeOutcome::Captured { .. } => {
                SubscriptionError::consistency("captured charge reported as a failure")
            }
        }
    }
}

/// Prefix of the payment id recorded for a zero-amount charge.
pub(crate) const WAIVED_PAYMENT_PREFIX: &str = "waived";

/// Idempotency key of the charge a pending record was claimed for.
pub(crate) fn pending_charge_key(subscription: &Subscription) -> Result<String, SubscriptionError> {
    subscription.pending_charge_key.clone().ok_or_else(|| {
        SubscriptionError::consistency(format!(
            "Subscription {} is pending without a charge key",
            subscription.id
        ))
    })
}

/// Logs a captured charge that the settling write did not record.
///
/// Called when settlement found the record no longer waiting on this charge.
/// If the record already holds this payment (a webhook got there first)
/// nothing is lost; otherwise money moved without access and someone has
/// to look at it.
pub(crate) fn report_unsettled_capture(subscription: &Subscription, outcome: &ChargeOutcome) {
    let ChargeOutcome::Captured { payment_id } = outcome else {
        return;
    };
    let recorded = subscription
        .last_payment
        .as_ref()
        .filter(|p| p.captured)
        .and_then(|p| p.external_payment_id.as_deref());
    if recorded != Some(payment_id.as_str()) {
        error!(
            subscription_id = %subscription.id,
            payment_id = %payment_id,
            status = %subscription.status,
            amount_cents = subscription.price_cents,
            "Charge captured but subscription no longer awaiting it; needs reconciliation"
        );
    }
}

/// Charges `subscription.price_cents` against its stored payment token.
///
/// A zero amount (100% discount) never reaches the gateway and counts as
/// captured. Gateway errors and timeouts are folded into
/// `ChargeOutcome::Failed`.
pub(crate) async fn charge(
    gateway: &dyn PaymentGateway,
    policy: &ChargePolicy,
    subscription: &Subscription,
    idempotency_key: String,
) -> ChargeOutcome {
    if subscription.price_cents == 0 {
        info!(subscription_id = %subscription.id, "Zero-amount charge waived");
        return ChargeOutcome::Captured {
            payment_id: format!("{}-{}", WAIVED_PAYMENT_PREFIX, idempotency_key),
        };
    }

    let request = ChargeRequest {
        amount_cents: subscription.price_cents,
        currency: policy.currency.clone(),
        payment_token: subscription.payment_token.clone(),
        idempotency_key,
        subscription_id: subscription.id,
    };

    match tokio::time::timeout(policy.timeout, gateway.charge(request)).await {
        Ok(Ok(result)) if result.success => ChargeOutcome::Captured {
            payment_id: result.external_payment_id,
        },
        Ok(Ok(result)) => match result.redirect_url {
            Some(redirect_url) => ChargeOutcome::RequiresAction {
                payment_id: result.external_payment_id,
                redirect_url,
            },
            None => {
                let reason = result
                    .failure_reason
                    .unwrap_or_else(|| "declined".to_string());
                warn!(
                    subscription_id = %subscription.id,
                    payment_id = %result.external_payment_id,
                    reason = %reason,
                    "Charge declined"
                );
                ChargeOutcome::Failed {
                    payment_id: Some(result.external_payment_id),
                    reason,
                    timed_out: false,
                }
            }
        },
        Ok(Err(err)) => {
            warn!(
                subscription_id = %subscription.id,
                error_code = ?err.code,
                error = %err.message,
                "Charge errored"
            );
            ChargeOutcome::Failed {
                payment_id: None,
                reason: err.message,
                timed_out: false,
            }
        }
        Err(_) => {
            warn!(
                subscription_id = %subscription.id,
                timeout_ms = policy.timeout.as_millis() as u64,
                "Charge timed out"
            );
            ChargeOutcome::Failed {
                payment_id: None,
                reason: "gateway_timeout".to_string(),
                timed_out: true,
            }
        }
    }
}

/// Applies `decide` to the latest copy of a subscription and writes it.
///
/// `decide` mutates the copy and returns `Some(value)` to write it, or
/// `None` when the current state needs no change. A stale write re-reads
/// the record and asks again, so the caller's decision is always made
/// against the state it commits over.
///
/// Returns the stored subscription and the value from the successful
/// decision (`None` if nothing was written).
pub(crate) async fn commit_transition<T, F>(
    store: &dyn SubscriptionStore,
    mut current: Subscription,
    mut decide: F,
) -> Result<(Subscription, Option<T>), SubscriptionError>
where
    F: FnMut(&mut Subscription) -> Result<Option<T>, SubscriptionError>,
{
    for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
        let mut next = current.clone();
        let Some(value) = decide(&mut next)? else {
            return Ok((current, None));
        };

        match store.update(&next).await? {
            UpdateOutcome::Applied(saved) => {
                info!(
                    subscription_id = %saved.id,
                    author_id = %saved.author_id,
                    from = %current.status,
                    to = %saved.status,
                    version = saved.version,
                    "Subscription transition committed"
                );
                return Ok((saved, Some(value)));
            }
            UpdateOutcome::Stale => {
                warn!(subscription_id = %current.id, attempt, "Stale subscription write, re-reading");
                current = store
                    .find_by_id(&current.id)
                    .await?
                    .ok_or_else(|| SubscriptionError::not_found(current.id))?;
            }
        }
    }

    Err(SubscriptionError::concurrent(format!(
        "Subscription {} is being modified concurrently, retry shortly",
        current.id
    )))
}

/// What caused a transition; recorded in the event metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// A subscriber request, carrying the subscriber id.
    Subscriber(String),
    /// The background sweeper.
    Sweeper,
    /// A gateway notification, carrying its event id for correlation.
    Webhook { event_id: String },
}

impl Trigger {
    pub(crate) fn subscriber(subscription: &Subscription) -> Self {
        Trigger::Subscriber(subscription.subscriber_id.as_str().to_string())
    }

    fn actor(&self) -> &str {
        match self {
            Trigger::Subscriber(subscriber_id) => subscriber_id,
            Trigger::Sweeper => "sweeper",
            Trigger::Webhook { .. } => "webhook",
        }
    }
}

/// Publishes events after commit. Failures are logged, never returned.
pub(crate) async fn publish(
    publisher: &dyn EventPublisher,
    trigger: &Trigger,
    events: Vec<SubscriptionEvent>,
) {
    for event in events {
        let envelope = match event.to_envelope() {
            Ok(envelope) => envelope.with_triggered_by(trigger.actor()),
            Err(err) => {
                warn!(subscription_id = %event.subscription_id(), error = %err, "Failed to serialize event");
                continue;
            }
        };
        let envelope = match trigger {
            Trigger::Webhook { event_id } => envelope.with_correlation_id(event_id.clone()),
            _ => envelope,
        };
        let event_type = envelope.event_type.clone();
        if let Err(err) = publisher.publish(envelope).await {
            warn!(
                subscription_id = %event.subscription_id(),
                event_type = %event_type,
                error = %err,
                "Failed to publish event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::adapters::stripe::{MockCharge, MockPaymentGateway};
    use crate::adapters::InMemoryEventBus;
    use crate::domain::foundation::{AuthorId, SubscriberId};
    use crate::domain::subscription::{PlanCalculator, PlanType, SubscriptionStatus, SubscriptionTerms};
    use crate::ports::PaymentError;

    fn pending(now: Timestamp) -> Subscription {
        Subscription::new_pending(
            SubscriptionId::new(),
            SubscriptionTerms {
                subscriber_id: SubscriberId::new("reader-1").unwrap(),
                author_id: AuthorId::new("author-1").unwrap(),
                plan: PlanType::Monthly,
                price_cents: 500,
                discount_percent: None,
                payment_token: "pm_card_visa".to_string(),
            },
            PlanCalculator::period(now, PlanType::Monthly).unwrap(),
            now,
        )
    }

    // ════════════════════════════════════════════════════════════════════════════
    // charge
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn charge_classifies_gateway_answers() {
        let gateway = MockPaymentGateway::new();
        gateway.push_outcome(MockCharge::Succeed);
        gateway.push_outcome(MockCharge::Decline("card_declined".into()));
        gateway.push_outcome(MockCharge::RequireAction("https://3ds".into()));
        gateway.push_outcome(MockCharge::Fail(PaymentError::network("reset")));
        let policy = ChargePolicy::default();
        let sub = pending(Timestamp::now());

        assert!(matches!(
            charge(&gateway, &policy, &sub, "k1".into()).await,
            ChargeOutcome::Captured { .. }
        ));
        assert!(matches!(
            charge(&gateway, &policy, &sub, "k2".into()).await,
            ChargeOutcome::Failed { ref reason, timed_out: false, .. } if reason == "card_declined"
        ));
        assert!(matches!(
            charge(&gateway, &policy, &sub, "k3".into()).await,
            ChargeOutcome::RequiresAction { ref redirect_url, .. } if redirect_url == "https://3ds"
        ));
        assert!(matches!(
            charge(&gateway, &policy, &sub, "k4".into()).await,
            ChargeOutcome::Failed { payment_id: None, timed_out: false, .. }
        ));
    }

    #[tokio::test]
    async fn charge_past_timeout_fails_closed() {
        let gateway = MockPaymentGateway::new();
        gateway.set_delay(Duration::from_millis(200));
        let policy = ChargePolicy::new("USD", Duration::from_millis(10));

        let outcome = charge(&gateway, &policy, &pending(Timestamp::now()), "k1".into()).await;
        assert!(matches!(outcome, ChargeOutcome::Failed { timed_out: true, .. }));

        let err = outcome.into_error(SubscriptionId::new());
        assert!(matches!(err, SubscriptionError::PaymentTimeout { .. }));
    }

    #[tokio::test]
    async fn charge_sends_stored_token_and_price() {
        let gateway = MockPaymentGateway::new();
        let sub = pending(Timestamp::now());
        charge(&gateway, &ChargePolicy::default(), &sub, "create-1".into()).await;

        let sent = gateway.charges();
        assert_eq!(sent[0].amount_cents, 500);
        assert_eq!(sent[0].payment_token, "pm_card_visa");
        assert_eq!(sent[0].idempotency_key, "create-1");
        assert_eq!(sent[0].currency, "USD");
    }

    #[tokio::test]
    async fn zero_amount_is_captured_without_calling_gateway() {
        let gateway = MockPaymentGateway::unavailable();
        let mut sub = pending(Timestamp::now());
        sub.price_cents = 0;

        let outcome = charge(&gateway, &ChargePolicy::default(), &sub, "create-1".into()).await;

        assert_eq!(
            outcome,
            ChargeOutcome::Captured {
                payment_id: "waived-create-1".to_string()
            }
        );
        assert_eq!(gateway.charge_count(), 0);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // commit_transition
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn commit_transition_redecides_after_stale_write() {
        let store = InMemorySubscriptionStore::new();
        let now = Timestamp::now();
        let stale = store.insert(&pending(now)).await.unwrap();

        // Another writer activates first.
        let mut winner = stale.clone();
        winner
            .activate(PaymentReference::captured("pi_1", 500, now), now)
            .unwrap();
        store.update(&winner).await.unwrap();

        let mut decisions = 0;
        let (current, applied) = commit_transition(&store, stale, |sub| {
            decisions += 1;
            if sub.status != SubscriptionStatus::Pending {
                return Ok(None);
            }
            sub.activate(PaymentReference::captured("pi_2", 500, now), now)?;
            Ok(Some(()))
        })
        .await
        .unwrap();

        assert_eq!(decisions, 2);
        assert!(applied.is_none());
        assert_eq!(current.status, SubscriptionStatus::Active);
        assert_eq!(current.total_paid_cents, 500);
        assert_eq!(store.subscriber_count(&current.author_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_transition_propagates_domain_rejection() {
        let store = InMemorySubscriptionStore::new();
        let now = Timestamp::now();
        let sub = store.insert(&pending(now)).await.unwrap();

        let err = commit_transition(&store, sub, |sub| {
            sub.expire(now)?;
            Ok(Some(()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidState { .. }));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // publish
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let bus = InMemoryEventBus::new();
        bus.set_failing(true);
        let event = SubscriptionEvent::Expired {
            subscription_id: SubscriptionId::new(),
            author_id: AuthorId::new("author-1").unwrap(),
            occurred_at: Timestamp::now(),
        };

        publish(&bus, &Trigger::Sweeper, vec![event]).await;
        assert_eq!(bus.event_count(), 0);
    }

    #[tokio::test]
    async fn publish_records_trigger_in_metadata() {
        let bus = InMemoryEventBus::new();
        let event = |occurred_at| SubscriptionEvent::Expired {
            subscription_id: SubscriptionId::new(),
            author_id: AuthorId::new("author-1").unwrap(),
            occurred_at,
        };

        publish(&bus, &Trigger::Subscriber("reader-1".into()), vec![event(Timestamp::now())]).await;
        publish(
            &bus,
            &Trigger::Webhook {
                event_id: "evt_1".into(),
            },
            vec![event(Timestamp::now())],
        )
        .await;

        let published = bus.published_events();
        assert_eq!(published[0].metadata.triggered_by.as_deref(), Some("reader-1"));
        assert_eq!(published[0].metadata.correlation_id, None);
        assert_eq!(published[1].metadata.triggered_by.as_deref(), Some("webhook"));
        assert_eq!(published[1].metadata.correlation_id.as_deref(), Some("evt_1"));
    }
}
