//! Author Subscriptions - recurring billing for per-author reader subscriptions
//!
//! Readers subscribe to an author on a monthly, yearly or lifetime plan. The
//! crate prices plans, charges through a payment gateway, keeps each author's
//! subscriber count in step with subscription status, renews or expires
//! subscriptions in the background and reports author revenue.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
