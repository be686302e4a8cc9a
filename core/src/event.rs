//! Domain event traits consumed by the capture hook.
//!
//! Any aggregate that can report "pending events since last drain" can feed
//! the outbox: implement [`HasDomainEvents`] on the aggregate and
//! [`DomainEvent`] (plus [`EventType`](crate::registry::EventType) for
//! registration) on each event it raises.

use chrono::{DateTime, Utc};

/// A domain event destined for the outbox.
///
/// Implementations are expected to be plain data: the dispatcher treats the
/// payload as opaque JSON and downstream consumers deduplicate on
/// [`event_id`](Self::event_id).
///
/// # Example
///
/// ```
/// use chrono::{DateTime, Utc};
/// use outbox_relay_core::event::DomainEvent;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct OrderPlaced {
///     event_id: uuid::Uuid,
///     occurred_on: DateTime<Utc>,
///     order_id: u64,
/// }
///
/// impl DomainEvent for OrderPlaced {
///     fn event_id(&self) -> uuid::Uuid {
///         self.event_id
///     }
///
///     fn occurred_on_utc(&self) -> DateTime<Utc> {
///         self.occurred_on
///     }
///
///     fn type_key(&self) -> &str {
///         "orders.order-placed"
///     }
///
///     fn payload_json(&self) -> Result<String, serde_json::Error> {
///         serde_json::to_string(self)
///     }
/// }
/// ```
pub trait DomainEvent: Send + Sync {
    /// Logical event id; downstream consumers use it for idempotency.
    fn event_id(&self) -> uuid::Uuid;

    /// When the business event occurred (UTC).
    fn occurred_on_utc(&self) -> DateTime<Utc>;

    /// Stable type key; must match a registered
    /// [`EventType::TYPE_KEY`](crate::registry::EventType::TYPE_KEY).
    fn type_key(&self) -> &str;

    /// Serialize the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the payload cannot be serialized;
    /// the capture hook fails the whole capture in that case.
    fn payload_json(&self) -> Result<String, serde_json::Error>;

    /// Optional transport headers (JSON), opaque to the relay.
    fn headers_json(&self) -> Option<String> {
        None
    }

    /// Optional correlation id for tracing.
    fn correlation_id(&self) -> Option<String> {
        None
    }
}

/// Implemented by aggregates that accumulate domain events.
///
/// The capture hook drains every participating aggregate exactly once per
/// business transaction; draining returns the accumulated events and clears
/// them from the source so they cannot be captured twice.
pub trait HasDomainEvents {
    /// Take and clear all pending events raised since the last drain.
    fn drain_events(&mut self) -> Vec<Box<dyn DomainEvent>>;
}
