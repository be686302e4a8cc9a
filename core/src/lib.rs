//! # Outbox Relay Core
//!
//! Core types and traits for the Outbox Relay: a durable, at-least-once
//! transactional-outbox implementation.
//!
//! ## Core Concepts
//!
//! - **Message record** ([`message::OutboxMessage`]): the durable unit of
//!   work, with a four-state lifecycle (`Pending`, `Processing`,
//!   `Processed`, `DeadLetter`) and an optimistic-concurrency token guarding
//!   every mutation.
//! - **Type registry** ([`registry::TypeRegistry`]): explicit allowlist of
//!   event types, consulted at capture and at dispatch.
//! - **Capture hook** ([`capture::OutboxCapture`]): drains pending domain
//!   events from aggregates into `Pending` records inside the same atomic
//!   transaction as the triggering business write.
//! - **Backoff policy** ([`backoff::BackoffPolicy`]): pure exponential
//!   retry-delay computation with jitter.
//! - **Store and publisher seams** ([`store::OutboxStore`],
//!   [`publisher::OutboxPublisher`]): the two external collaborators the
//!   relay is generic over.
//!
//! ## Delivery Guarantee
//!
//! At-least-once. A worker crash between claim and finalize leaves the
//! record `Processing` until its lease expires, after which any worker may
//! reclaim it; a publish that was actually in flight may therefore be
//! repeated. Downstream consumers deduplicate on the logical `event_id`.
//!
//! ## Example
//!
//! ```ignore
//! use outbox_relay_core::prelude::*;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register::<OrderPlaced>();
//!
//! let capture = OutboxCapture::new(Arc::new(registry), Arc::new(SystemClock));
//! let staged = capture.drain(&mut [&mut order])?;
//! // insert `staged` inside the business transaction, then let the
//! // runtime's dispatcher drain the outbox.
//! ```

pub mod backoff;
pub mod capture;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod event;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod store;

/// Convenience re-exports of the types most integrations need.
pub mod prelude {
    pub use crate::backoff::BackoffPolicy;
    pub use crate::capture::{CaptureError, OutboxCapture};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{AdminOptions, OutboxOptions};
    pub use crate::envelope::OutboxEnvelope;
    pub use crate::event::{DomainEvent, HasDomainEvents};
    pub use crate::message::{ConcurrencyToken, OutboxMessage, OutboxStatus};
    pub use crate::publisher::{OutboxPublisher, PublishError};
    pub use crate::registry::{EventType, TypeRegistry};
    pub use crate::store::{OutboxStats, OutboxStore, OutboxStoreError};
}
