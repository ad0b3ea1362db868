//! Subscription domain - per-author recurring subscriptions.
//!
//! # Lifecycle
//!
//! ```text
//! create ──► Pending ──charge ok──► Active ──period end──► Expired
//!              │                     │  ▲                    │
//!              │ charge failed       │  └─ auto-renewal      │
//!              ▼                     ▼                       │
//!          Cancelled ◄──────── cancel(now)                   │
//!              │                                             │
//!              └──────── renew ──► Pending ──► Active ◄──────┘
//! ```
//!
//! Trials start counted and convert (or expire) at `trial_expires_at`.
//! The author's `subscriber_count` tracks `Active` + `Trial` and is
//! adjusted by the store in the same write as the status change.

mod aggregate;
mod discount;
mod errors;
mod events;
mod payment;
mod plan;
mod revenue;
mod status;

pub use aggregate::{
    CancelEffect, Subscription, SubscriptionTerms, CONFIRMATION_TIMEOUT_REASON,
    PAYMENT_FAILED_REASON,
};
pub use discount::DiscountCode;
pub use errors::SubscriptionError;
pub use events::SubscriptionEvent;
pub use payment::PaymentReference;
pub use plan::{BillingPeriod, PlanCalculator, PlanType};
pub use revenue::{AuthorStats, RevenueAccountant};
pub use status::SubscriptionStatus;
