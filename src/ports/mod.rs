//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `SubscriptionStore` - Subscriptions plus author counters, atomic transitions
//! - `PaymentGateway` - Charges and signed payment notifications
//! - `AuthorDirectory` - Current per-plan prices
//! - `DiscountValidator` - Discount code redemption rules
//! - `EventPublisher` - Domain event delivery
//! - `Clock` - Current time

mod author_directory;
mod clock;
mod discount_validator;
mod event_publisher;
mod payment_gateway;
mod subscription_store;

pub use author_directory::{AuthorDirectory, AuthorPricing};
pub use clock::Clock;
pub use discount_validator::{DiscountValidation, DiscountValidator};
pub use event_publisher::EventPublisher;
pub use payment_gateway::{
    ChargeRequest, ChargeResult, NotificationOutcome, PaymentError, PaymentErrorCode,
    PaymentGateway, PaymentNotification,
};
pub use subscription_store::{CounterReconciliation, SubscriptionStore, UpdateOutcome};
