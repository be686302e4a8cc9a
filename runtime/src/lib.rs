//! # Outbox Relay Runtime
//!
//! The dispatch runtime for the Outbox Relay: claim/publish/finalize
//! cycles, the long-running poll loop, retention cleanup, and the
//! operator-facing admin service.
//!
//! ## Architecture
//!
//! - [`dispatcher::OutboxDispatcher`]: one complete dispatch cycle at a
//!   time. Claims a batch of eligible records with a lease, publishes each
//!   through the configured [`OutboxPublisher`], and finalizes every record
//!   with a token-checked conditional update.
//! - [`relay::OutboxRelay`]: wraps a dispatcher in a polling loop with
//!   graceful shutdown via a `watch` channel.
//! - [`admin::OutboxAdmin`]: stats, dead-letter inspection, requeue, and
//!   purge, with hard caps on bulk operations.
//!
//! Multiple relay processes may run against one store; claim conflicts are
//! the coordination mechanism, not an error.
//!
//! [`OutboxPublisher`]: outbox_relay_core::publisher::OutboxPublisher

pub mod admin;
pub mod dispatcher;
pub mod relay;

pub use admin::{AdminError, OutboxAdmin};
pub use dispatcher::OutboxDispatcher;
pub use relay::OutboxRelay;
