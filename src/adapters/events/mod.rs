//! Event publisher adapters.
//!
//! - `InMemoryEventBus` - Captures events for test assertions
//! - `LogEventPublisher` - Emits events as structured log records

mod in_memory;
mod log_publisher;

pub use in_memory::InMemoryEventBus;
pub use log_publisher::LogEventPublisher;
