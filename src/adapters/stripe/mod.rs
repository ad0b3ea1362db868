//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port with Stripe PaymentIntents:
//! - One-shot charges with idempotency keys
//! - 3-D Secure redirects surfaced as `requires_action`
//! - Webhook signature verification for asynchronous settlement
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod mock_payment_gateway;
mod stripe_adapter;
mod webhook_types;

pub use mock_payment_gateway::{MockCharge, MockPaymentGateway};
pub use stripe_adapter::{StripeConfig, StripePaymentGateway};
pub use webhook_types::{SignatureHeader, SignatureParseError, StripePaymentIntent, StripeWebhookEvent};
