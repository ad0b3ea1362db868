//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `clock` - System and manual clocks
//! - `events` - Event publishers (in-memory, structured log)
//! - `http` - Axum REST API
//! - `memory` - In-memory store, pricing directory and discount table
//! - `postgres` - PostgreSQL store, pricing directory and discount table
//! - `stripe` - Stripe payment gateway and its mock

pub mod clock;
pub mod events;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use clock::{ManualClock, SystemClock};
pub use events::{InMemoryEventBus, LogEventPublisher};
