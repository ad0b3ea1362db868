//! In-memory event bus implementation for testing.
//!
//! Captures every published envelope so tests can assert on what the
//! lifecycle emitted, and can be switched into a failing mode to check
//! that a broken event sink never rolls back a committed transition.
//!
//! # Panics
//!
//! The assertion helpers use `.expect()` on lock operations and panic if a
//! lock is poisoned. `publish` itself reports poisoning as a `DomainError`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, EventEnvelope};
use crate::ports::EventPublisher;

/// In-memory event bus for testing.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryEventBus::new());
/// bus.publish(envelope).await?;
///
/// assert_eq!(bus.event_count(), 1);
/// assert!(bus.has_event("subscription.activated.v1"));
/// ```
#[derive(Default)]
pub struct InMemoryEventBus {
    published: RwLock<Vec<EventEnvelope>>,
    failing: AtomicBool,
}

impl InMemoryEventBus {
    /// Creates a new empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `publish` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    // === Test Helpers ===

    /// Returns all published events (for test assertions).
    pub fn published_events(&self) -> Vec<EventEnvelope> {
        self.published
            .read()
            .expect("InMemoryEventBus: published lock poisoned")
            .clone()
    }

    /// Returns events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.published_events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Returns events for a specific aggregate.
    pub fn events_for_aggregate(&self, aggregate_id: &str) -> Vec<EventEnvelope> {
        self.published_events()
            .into_iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .collect()
    }

    /// Clears all published events (for test isolation).
    pub fn clear(&self) {
        self.published
            .write()
            .expect("InMemoryEventBus: published write lock poisoned")
            .clear();
    }

    /// Returns count of published events.
    pub fn event_count(&self) -> usize {
        self.published
            .read()
            .expect("InMemoryEventBus: published lock poisoned")
            .len()
    }

    /// Checks if a specific event type was published.
    pub fn has_event(&self, event_type: &str) -> bool {
        self.published
            .read()
            .expect("InMemoryEventBus: published lock poisoned")
            .iter()
            .any(|e| e.event_type == event_type)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                "Event bus unavailable",
            ));
        }

        self.published
            .write()
            .map_err(|_| DomainError::new(ErrorCode::InternalError, "Event bus lock poisoned"))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, aggregate_id: &str) -> EventEnvelope {
        EventEnvelope::new(event_type, aggregate_id, "Subscription", json!({}))
    }

    #[tokio::test]
    async fn publish_captures_events() {
        let bus = InMemoryEventBus::new();
        bus.publish(envelope("subscription.created.v1", "s1")).await.unwrap();
        bus.publish(envelope("subscription.activated.v1", "s1")).await.unwrap();
        bus.publish(envelope("subscription.created.v1", "s2")).await.unwrap();

        assert_eq!(bus.event_count(), 3);
        assert_eq!(bus.events_of_type("subscription.created.v1").len(), 2);
        assert_eq!(bus.events_for_aggregate("s1").len(), 2);
        assert!(bus.has_event("subscription.activated.v1"));
    }

    #[tokio::test]
    async fn failing_mode_rejects_and_records_nothing() {
        let bus = InMemoryEventBus::new();
        bus.set_failing(true);
        assert!(bus.publish(envelope("subscription.created.v1", "s1")).await.is_err());
        assert_eq!(bus.event_count(), 0);

        bus.set_failing(false);
        assert!(bus.publish(envelope("subscription.created.v1", "s1")).await.is_ok());
    }

    #[tokio::test]
    async fn clear_resets_capture() {
        let bus = InMemoryEventBus::new();
        bus.publish(envelope("subscription.expired.v1", "s1")).await.unwrap();
        bus.clear();
        assert_eq!(bus.event_count(), 0);
    }
}
