//! Capture hook: turns pending domain events into outbox records.
//!
//! [`OutboxCapture::drain`] runs as part of an about-to-commit business
//! transaction. It collects every pending event from the participating
//! aggregates, clears them from their sources, validates each type key
//! against the registry, and produces one `Pending` [`OutboxMessage`] per
//! event. The caller inserts the staged records through its store's atomic
//! boundary (e.g. the same sqlx transaction as the business write) so either
//! both the business change and its event records persist, or neither does.
//!
//! An unregistered event type fails the whole capture, and therefore the
//! business transaction, rather than silently dropping the event.

use crate::clock::Clock;
use crate::event::HasDomainEvents;
use crate::message::OutboxMessage;
use crate::registry::{RegistryError, TypeRegistry};
use std::sync::Arc;
use thiserror::Error;

/// Errors that fail a capture (and with it, the host transaction).
#[derive(Error, Debug)]
pub enum CaptureError {
    /// An event's type key is not in the registry allowlist. This is a
    /// configuration error: register the type at startup.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An event payload could not be serialized.
    #[error("Failed to serialize event payload for '{type_key}': {source}")]
    Serialization {
        /// Type key of the offending event.
        type_key: String,
        /// Underlying serializer error.
        source: serde_json::Error,
    },
}

/// Drains pending domain events from aggregates into staged outbox records.
///
/// # Example
///
/// ```ignore
/// let capture = OutboxCapture::new(registry, clock);
/// let staged = capture.drain(&mut [&mut order, &mut customer])?;
/// store.insert_in_tx(&mut tx, &staged).await?; // same tx as the business write
/// tx.commit().await?;
/// ```
pub struct OutboxCapture {
    registry: Arc<TypeRegistry>,
    clock: Arc<dyn Clock>,
}

impl OutboxCapture {
    /// Create a capture hook over a populated registry.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// Drain all pending events from `sources` into staged outbox records.
    ///
    /// Events are cleared from their sources as they are collected. Records
    /// are stamped `Pending` with `next_attempt_utc = now`, a zero attempt
    /// count, and the schema version registered for their type key.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Registry`] if any event's type key is
    /// unregistered, or [`CaptureError::Serialization`] if a payload cannot
    /// be serialized. On error the staged batch is discarded; callers must
    /// abort the host transaction.
    pub fn drain(
        &self,
        sources: &mut [&mut dyn HasDomainEvents],
    ) -> Result<Vec<OutboxMessage>, CaptureError> {
        let mut events = Vec::new();
        for source in sources.iter_mut() {
            events.extend(source.drain_events());
        }

        if events.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut staged = Vec::with_capacity(events.len());

        for event in &events {
            let type_key = event.type_key();
            let schema_version = self.registry.schema_version(type_key)?;

            let payload = event
                .payload_json()
                .map_err(|source| CaptureError::Serialization {
                    type_key: type_key.to_string(),
                    source,
                })?;

            let mut message = OutboxMessage::new(
                event.event_id(),
                type_key,
                schema_version,
                event.occurred_on_utc(),
                payload,
                now,
            );
            message.headers_json = event.headers_json();
            message.correlation_id = event.correlation_id();

            staged.push(message);
        }

        Ok(staged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::event::DomainEvent;
    use crate::message::OutboxStatus;
    use crate::registry::EventType;
    use chrono::{DateTime, Utc};
    use serde::Serialize;

    #[derive(Serialize)]
    struct OrderPlaced {
        event_id: uuid::Uuid,
        occurred_on: DateTime<Utc>,
        order_id: u64,
    }

    impl EventType for OrderPlaced {
        const TYPE_KEY: &'static str = "orders.order-placed";
        const SCHEMA_VERSION: i32 = 3;
    }

    impl DomainEvent for OrderPlaced {
        fn event_id(&self) -> uuid::Uuid {
            self.event_id
        }

        fn occurred_on_utc(&self) -> DateTime<Utc> {
            self.occurred_on
        }

        fn type_key(&self) -> &str {
            Self::TYPE_KEY
        }

        fn payload_json(&self) -> Result<String, serde_json::Error> {
            serde_json::to_string(self)
        }
    }

    struct Order {
        events: Vec<Box<dyn DomainEvent>>,
    }

    impl Order {
        fn with_placed_event() -> (Self, uuid::Uuid) {
            let event_id = uuid::Uuid::new_v4();
            let order = Self {
                events: vec![Box::new(OrderPlaced {
                    event_id,
                    occurred_on: Utc::now(),
                    order_id: 42,
                })],
            };
            (order, event_id)
        }
    }

    impl HasDomainEvents for Order {
        fn drain_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
            std::mem::take(&mut self.events)
        }
    }

    fn capture_with(registry: TypeRegistry) -> OutboxCapture {
        OutboxCapture::new(
            Arc::new(registry),
            Arc::new(crate::clock::SystemClock),
        )
    }

    #[test]
    fn drains_events_into_pending_records() {
        let mut registry = TypeRegistry::new();
        registry.register::<OrderPlaced>();
        let capture = capture_with(registry);

        let (mut order, event_id) = Order::with_placed_event();
        let staged = capture
            .drain(&mut [&mut order])
            .expect("capture should succeed");

        assert_eq!(staged.len(), 1);
        let msg = &staged[0];
        assert_eq!(msg.event_id, event_id);
        assert_eq!(msg.type_key, "orders.order-placed");
        assert_eq!(msg.version, 3);
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempt_count, 0);
        assert!(msg.payload_json.contains("\"order_id\":42"));

        // Source was cleared: a second drain stages nothing.
        let again = capture
            .drain(&mut [&mut order])
            .expect("capture should succeed");
        assert!(again.is_empty());
    }

    #[test]
    fn unregistered_event_fails_the_capture() {
        let capture = capture_with(TypeRegistry::new());

        let (mut order, _) = Order::with_placed_event();
        let result = capture.drain(&mut [&mut order]);

        assert!(matches!(
            result,
            Err(CaptureError::Registry(RegistryError::UnregisteredKey(key))) if key == "orders.order-placed"
        ));
    }

    #[test]
    fn empty_sources_stage_nothing() {
        let mut registry = TypeRegistry::new();
        registry.register::<OrderPlaced>();
        let capture = capture_with(registry);

        let mut order = Order { events: vec![] };
        let staged = capture
            .drain(&mut [&mut order])
            .expect("capture should succeed");
        assert!(staged.is_empty());
    }
}
