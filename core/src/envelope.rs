//! Immutable message envelope handed to the transport publisher.

use crate::message::OutboxMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an outbox message presented to the publisher.
///
/// The envelope carries everything a transport needs to route and deliver
/// the event; the relay's bookkeeping fields (status, attempts, lease) are
/// deliberately absent. Publishers must treat it as read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEnvelope {
    /// Outbox record id (relay-internal identity)
    pub outbox_id: uuid::Uuid,
    /// Logical event id for downstream idempotency
    pub event_id: uuid::Uuid,
    /// Registered type key
    pub type_key: String,
    /// Payload schema version
    pub version: i32,
    /// When the business event occurred (UTC)
    pub occurred_on_utc: DateTime<Utc>,
    /// Payload content type
    pub content_type: String,
    /// Serialized event payload
    pub payload_json: String,
    /// Optional transport headers (JSON)
    pub headers_json: Option<String>,
    /// Optional correlation id
    pub correlation_id: Option<String>,
}

impl From<&OutboxMessage> for OutboxEnvelope {
    fn from(msg: &OutboxMessage) -> Self {
        Self {
            outbox_id: msg.id,
            event_id: msg.event_id,
            type_key: msg.type_key.clone(),
            version: msg.version,
            occurred_on_utc: msg.occurred_on_utc,
            content_type: msg.content_type.clone(),
            payload_json: msg.payload_json.clone(),
            headers_json: msg.headers_json.clone(),
            correlation_id: msg.correlation_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_mirrors_message_fields() {
        let now = Utc::now();
        let mut msg = OutboxMessage::new(
            uuid::Uuid::new_v4(),
            "orders.order-placed",
            2,
            now,
            r#"{"order_id":1}"#,
            now,
        );
        msg.correlation_id = Some("req-123".to_string());

        let envelope = OutboxEnvelope::from(&msg);

        assert_eq!(envelope.outbox_id, msg.id);
        assert_eq!(envelope.event_id, msg.event_id);
        assert_eq!(envelope.type_key, "orders.order-placed");
        assert_eq!(envelope.version, 2);
        assert_eq!(envelope.payload_json, msg.payload_json);
        assert_eq!(envelope.correlation_id.as_deref(), Some("req-123"));
    }
}
