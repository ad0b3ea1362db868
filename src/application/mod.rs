//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Following CQRS, it separates command handlers (write) from query handlers (read).
//! The expiration sweeper drives the time-based commands in the background.

pub mod expiration_sweeper;
pub mod handlers;

pub use expiration_sweeper::{ExpirationSweeper, ExpirationSweeperConfig, SweepReport};
pub use handlers::subscription::{
    // Commands
    AutoRenewSubscriptionCommand, AutoRenewSubscriptionHandler, AutoRenewSubscriptionResult,
    CancelStalePendingCommand, CancelStalePendingHandler, CancelStalePendingResult,
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    ChargePolicy, ConfirmPaymentCommand, ConfirmPaymentHandler, ConfirmPaymentResult,
    CreateSubscriptionCommand, CreateSubscriptionHandler, CreateSubscriptionResult,
    ExpireSubscriptionCommand, ExpireSubscriptionHandler, ExpireSubscriptionResult,
    PaymentOutcome, ReconcileCountersCommand, ReconcileCountersHandler, ReconcileCountersResult,
    RenewSubscriptionCommand, RenewSubscriptionHandler, RenewSubscriptionResult, RenewalOutcome,
    // Queries
    GetAuthorStatsHandler, GetAuthorStatsQuery, GetSubscriptionHandler, GetSubscriptionQuery,
    ListSubscriberSubscriptionsHandler, ListSubscriberSubscriptionsQuery, SubscriptionSummary,
};
