//! Subscription handlers.
//!
//! Command and query handlers for the subscription lifecycle.
//!
//! ## Commands
//! - Creating subscriptions (paid, discounted, or trial)
//! - Cancelling now or at period end
//! - Manual and automatic renewal
//! - Expiring lapsed subscriptions
//! - Settling 3-D Secure charges from gateway webhooks
//! - Failing pending charges that were never confirmed
//! - Reconciling subscriber counters
//!
//! ## Queries
//! - Get one subscription
//! - List a subscriber's subscriptions
//! - Get an author's revenue statistics

mod auto_renew;
mod cancel_stale_pending;
mod cancel_subscription;
mod confirm_payment;
mod create_subscription;
mod expire_subscription;
mod get_author_stats;
mod get_subscription;
mod list_subscriber_subscriptions;
mod reconcile_counters;
mod renew_subscription;
mod support;

#[cfg(test)]
pub(crate) mod testing;

pub use support::ChargePolicy;

// Commands
pub use auto_renew::{
    AutoRenewSubscriptionCommand, AutoRenewSubscriptionHandler, AutoRenewSubscriptionResult,
    RenewalOutcome,
};
pub use cancel_stale_pending::{
    CancelStalePendingCommand, CancelStalePendingHandler, CancelStalePendingResult,
};
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use confirm_payment::{ConfirmPaymentCommand, ConfirmPaymentHandler, ConfirmPaymentResult};
pub use create_subscription::{
    CreateSubscriptionCommand, CreateSubscriptionHandler, CreateSubscriptionResult, PaymentOutcome,
};
pub use expire_subscription::{
    ExpireSubscriptionCommand, ExpireSubscriptionHandler, ExpireSubscriptionResult,
};
pub use reconcile_counters::{
    ReconcileCountersCommand, ReconcileCountersHandler, ReconcileCountersResult,
};
pub use renew_subscription::{
    RenewSubscriptionCommand, RenewSubscriptionHandler, RenewSubscriptionResult,
};

// Queries
pub use get_author_stats::{GetAuthorStatsHandler, GetAuthorStatsQuery};
pub use get_subscription::{GetSubscriptionHandler, GetSubscriptionQuery, SubscriptionSummary};
pub use list_subscriber_subscriptions::{
    ListSubscriberSubscriptionsHandler, ListSubscriberSubscriptionsQuery,
};
