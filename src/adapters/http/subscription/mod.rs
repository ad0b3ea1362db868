//! HTTP adapter for subscription endpoints.
//!
//! Exposes the subscription lifecycle via REST API:
//! - `POST /api/subscriptions/create` - Subscribe a reader to an author
//! - `POST /api/subscriptions/cancel` - Cancel now or at period end
//! - `POST /api/subscriptions/renew` - Reactivate a cancelled or expired subscription
//! - `GET /api/subscriptions/stats/:author_id` - Author revenue figures
//! - `GET /api/subscriptions/:id` - One subscription
//! - `GET /api/subscribers/:subscriber_id/subscriptions` - A reader's subscriptions
//! - `POST /api/webhooks/payments` - Gateway payment confirmations

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{SubscriptionApiError, SubscriptionAppState};
pub use routes::subscription_router;
