//! Subscription domain events.
//!
//! Every committed transition emits exactly one event. Events are named in
//! past tense and published after the store write succeeds.

use crate::domain::foundation::{AuthorId, DomainEvent, SubscriberId, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};

use super::PlanType;

/// Events that occur during the subscription lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// A subscription record was created (`pending` or `trial`).
    Created {
        subscription_id: SubscriptionId,
        subscriber_id: SubscriberId,
        author_id: AuthorId,
        plan: PlanType,
        price_cents: i64,
        trial: bool,
        occurred_at: Timestamp,
    },

    /// First charge captured. Pending → Active.
    Activated {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        amount_cents: i64,
        expires_at: Timestamp,
        occurred_at: Timestamp,
    },

    /// First charge declined, errored or timed out. Pending → Cancelled.
    PaymentFailed {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        reason: String,
        occurred_at: Timestamp,
    },

    /// Cancelled with immediate effect.
    Cancelled {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        reason: Option<String>,
        occurred_at: Timestamp,
    },

    /// Auto-renewal switched off; access continues until `effective_at`.
    CancellationScheduled {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        effective_at: Timestamp,
        occurred_at: Timestamp,
    },

    /// A new paid period started.
    Renewed {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        amount_cents: i64,
        new_period_start: Timestamp,
        new_period_end: Timestamp,
        occurred_at: Timestamp,
    },

    /// A renewal charge failed; the subscription did not start a new period.
    RenewalFailed {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        reason: String,
        occurred_at: Timestamp,
    },

    /// Period ended without renewal.
    Expired {
        subscription_id: SubscriptionId,
        author_id: AuthorId,
        occurred_at: Timestamp,
    },
}

impl SubscriptionEvent {
    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            SubscriptionEvent::Created { subscription_id, .. }
            | SubscriptionEvent::Activated { subscription_id, .. }
            | SubscriptionEvent::PaymentFailed { subscription_id, .. }
            | SubscriptionEvent::Cancelled { subscription_id, .. }
            | SubscriptionEvent::CancellationScheduled { subscription_id, .. }
            | SubscriptionEvent::Renewed { subscription_id, .. }
            | SubscriptionEvent::RenewalFailed { subscription_id, .. }
            | SubscriptionEvent::Expired { subscription_id, .. } => *subscription_id,
        }
    }
}

impl DomainEvent for SubscriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEvent::Created { .. } => "subscription.created.v1",
            SubscriptionEvent::Activated { .. } => "subscription.activated.v1",
            SubscriptionEvent::PaymentFailed { .. } => "subscription.payment_failed.v1",
            SubscriptionEvent::Cancelled { .. } => "subscription.cancelled.v1",
            SubscriptionEvent::CancellationScheduled { .. } => {
                "subscription.cancellation_scheduled.v1"
            }
            SubscriptionEvent::Renewed { .. } => "subscription.renewed.v1",
            SubscriptionEvent::RenewalFailed { .. } => "subscription.renewal_failed.v1",
            SubscriptionEvent::Expired { .. } => "subscription.expired.v1",
        }
    }

    fn aggregate_id(&self) -> String {
        self.subscription_id().to_string()
    }

    fn aggregate_type(&self) -> &'static str {
        "Subscription"
    }

    fn occurred_at(&self) -> Timestamp {
        match self {
            SubscriptionEvent::Created { occurred_at, .. }
            | SubscriptionEvent::Activated { occurred_at, .. }
            | SubscriptionEvent::PaymentFailed { occurred_at, .. }
            | SubscriptionEvent::Cancelled { occurred_at, .. }
            | SubscriptionEvent::CancellationScheduled { occurred_at, .. }
            | SubscriptionEvent::Renewed { occurred_at, .. }
            | SubscriptionEvent::RenewalFailed { occurred_at, .. }
            | SubscriptionEvent::Expired { occurred_at, .. } => *occurred_at,
        }
    }
}
