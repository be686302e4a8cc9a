//! Transport publisher abstraction.
//!
//! The relay never talks to a broker directly; it hands an immutable
//! [`OutboxEnvelope`] to an implementation of [`OutboxPublisher`] and reacts
//! only to the retryable/fatal split of the returned error. Routing keys,
//! broker acknowledgements, and wire formats are the publisher's concern.

use crate::envelope::OutboxEnvelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure classes a publisher may raise.
///
/// Anything transient (connection refused, timeout, broker unavailable)
/// should be `Retryable`; the dispatcher counts it toward the retry budget
/// and backs off. `Fatal` is reserved for failures that retrying cannot fix
/// (e.g. the transport rejects the message shape outright) and dead-letters
/// the record immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Transient transport failure; the attempt is retried with backoff.
    #[error("Retryable publish failure: {0}")]
    Retryable(String),

    /// Permanent transport failure; the record is dead-lettered.
    #[error("Fatal publish failure: {0}")]
    Fatal(String),
}

/// External sink for outbox envelopes.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single publisher instance is
/// shared by all records of a dispatch batch.
///
/// # Dyn Compatibility
///
/// Uses an explicit `Pin<Box<dyn Future>>` return instead of `async fn` so
/// the dispatcher can hold an `Arc<dyn OutboxPublisher>`.
pub trait OutboxPublisher: Send + Sync {
    /// Publish one envelope to the transport.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Retryable`]: transient failure, retried with backoff
    /// - [`PublishError::Fatal`]: permanent failure, dead-letters the record
    fn publish(
        &self,
        envelope: OutboxEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_reason() {
        let retryable = PublishError::Retryable("broker unavailable".to_string());
        let fatal = PublishError::Fatal("schema rejected".to_string());

        assert!(format!("{retryable}").contains("broker unavailable"));
        assert!(format!("{fatal}").contains("schema rejected"));
    }
}
