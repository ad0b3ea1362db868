//! Event publisher that writes envelopes to the structured log.
//!
//! Used when no message broker is configured. Downstream consumers can
//! tail the JSON log stream and deduplicate on `event_id`.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventEnvelope};
use crate::ports::EventPublisher;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

impl LogEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<(), DomainError> {
        tracing::info!(
            target: "subscription_events",
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            triggered_by = event.metadata.triggered_by.as_deref(),
            correlation_id = event.metadata.correlation_id.as_deref(),
            occurred_at = %event.occurred_at.as_datetime(),
            payload = %event.payload,
            "Domain event"
        );
        Ok(())
    }
}
