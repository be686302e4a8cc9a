//! The claim/publish/finalize dispatch cycle and the retention cleanup job.
//!
//! One [`OutboxDispatcher`] per worker process; any number of workers may
//! run against the same store. Coordination is entirely through the store's
//! conditional updates: a claim that loses the race is an expected conflict
//! and is skipped silently, and a lease that outlives a crashed owner
//! expires on its own, making the record claimable again.

use chrono::{DateTime, Utc};
use outbox_relay_core::backoff::BackoffPolicy;
use outbox_relay_core::clock::Clock;
use outbox_relay_core::config::OutboxOptions;
use outbox_relay_core::envelope::OutboxEnvelope;
use outbox_relay_core::message::OutboxMessage;
use outbox_relay_core::publisher::{OutboxPublisher, PublishError};
use outbox_relay_core::registry::TypeRegistry;
use outbox_relay_core::store::{OutboxStore, OutboxStoreError};
use std::sync::Arc;
use tokio::sync::watch;

/// Records deleted per cleanup pass; bounded to keep transactions short.
const CLEANUP_BATCH_SIZE: usize = 500;

/// Executes outbox dispatch cycles: claim, publish, finalize.
///
/// # Failure Isolation
///
/// Per-record failures (publish errors, finalize conflicts, even store
/// errors while finalizing a single record) never abort the rest of the
/// batch. Only a failure to select candidates at all surfaces to the caller,
/// where the relay loop logs it and retries on the next tick.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn OutboxPublisher>,
    registry: Arc<TypeRegistry>,
    clock: Arc<dyn Clock>,
    options: OutboxOptions,
    backoff: BackoffPolicy,
}

impl OutboxDispatcher {
    /// Create a dispatcher over the given store, publisher, and registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn OutboxPublisher>,
        registry: Arc<TypeRegistry>,
        clock: Arc<dyn Clock>,
        options: OutboxOptions,
    ) -> Self {
        let backoff = BackoffPolicy::new(options.backoff_base_delay, options.backoff_max_delay);
        Self {
            store,
            publisher,
            registry,
            clock,
            options,
            backoff,
        }
    }

    /// The options this dispatcher was configured with.
    #[must_use]
    pub const fn options(&self) -> &OutboxOptions {
        &self.options
    }

    /// Run one dispatch cycle. Returns the number of records moved to
    /// `Processed`.
    ///
    /// The cycle observes `shutdown` between records and stops promptly when
    /// it flips to `true`; claimed-but-unfinalized records stay `Processing`
    /// and self-heal via lease expiry.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] only if candidate selection fails;
    /// everything after that is isolated per record.
    pub async fn dispatch_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<usize, OutboxStoreError> {
        let now = self.clock.now();
        let lease_until = now + to_chrono(self.options.lease_duration);

        let candidates = self
            .store
            .select_candidates(now, self.options.batch_size)
            .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let claimed = self.claim_candidates(candidates, lease_until).await;

        if claimed.is_empty() {
            return Ok(0);
        }

        tracing::debug!(
            count = claimed.len(),
            instance = %self.options.instance_id,
            "Outbox claimed messages"
        );

        let mut processed = 0;

        for id in claimed {
            if *shutdown.borrow() {
                tracing::info!(
                    instance = %self.options.instance_id,
                    "Shutdown requested, abandoning remainder of batch"
                );
                break;
            }

            if self.dispatch_one(id).await {
                processed += 1;
            }
        }

        Ok(processed)
    }

    /// Delete old `Processed` records, in one bounded batch.
    ///
    /// Returns the number deleted; 0 when retention is disabled. A delete
    /// that hits a conflict or store error is skipped; the next cleanup
    /// cycle picks it up.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError`] if the candidate query fails.
    pub async fn cleanup_once(&self) -> Result<usize, OutboxStoreError> {
        let Some(retention) = self.options.processed_retention else {
            return Ok(0);
        };

        let cutoff = self.clock.now() - to_chrono(retention);
        let ids = self
            .store
            .processed_older_than(cutoff, CLEANUP_BATCH_SIZE)
            .await?;

        if ids.is_empty() {
            return Ok(0);
        }

        match self.store.delete(ids).await {
            Ok(deleted) => {
                metrics::counter!("outbox.cleanup.deleted").increment(deleted);
                Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
            }
            Err(e) => {
                // Next cycle retries; nothing is lost by skipping.
                tracing::warn!(error = %e, "Outbox cleanup delete skipped");
                Ok(0)
            }
        }
    }

    /// Claim candidates one by one; conflicts are expected contention.
    async fn claim_candidates(
        &self,
        candidates: Vec<OutboxMessage>,
        lease_until: DateTime<Utc>,
    ) -> Vec<uuid::Uuid> {
        let mut claimed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let result = self
                .store
                .try_claim(
                    candidate.id,
                    candidate.row_version,
                    self.options.instance_id.clone(),
                    lease_until,
                )
                .await;

            match result {
                Ok(()) => claimed.push(candidate.id),
                Err(e) if e.is_conflict() => {
                    metrics::counter!("outbox.claim.conflict").increment(1);
                    tracing::trace!(id = %candidate.id, "Lost claim race");
                }
                Err(OutboxStoreError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(id = %candidate.id, error = %e, "Claim failed");
                }
            }
        }

        claimed
    }

    /// Dispatch a single claimed record. Returns `true` if it reached
    /// `Processed`.
    async fn dispatch_one(&self, id: uuid::Uuid) -> bool {
        let message = match self.store.get(id).await {
            Ok(Some(message)) => message,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Re-read of claimed message failed");
                return false;
            }
        };

        // Claim-to-dispatch gaps can outlive the lease on a slow worker; if
        // ownership is gone, some other worker is responsible now.
        if !message.is_owned_by(&self.options.instance_id, self.clock.now()) {
            tracing::debug!(id = %id, "Lease no longer held, skipping");
            return false;
        }

        if !self.registry.is_registered(&message.type_key) {
            let reason = format!(
                "Type key '{}' is not registered in the outbox type registry",
                message.type_key
            );
            self.finalize_dead_letter(message, &reason).await;
            return false;
        }

        let envelope = OutboxEnvelope::from(&message);

        match self.publisher.publish(envelope).await {
            Ok(()) => self.finalize_processed(message).await,
            Err(PublishError::Retryable(reason)) => {
                self.finalize_retry(message, &reason).await;
                false
            }
            Err(PublishError::Fatal(reason)) => {
                self.finalize_dead_letter(message, &reason).await;
                false
            }
        }
    }

    async fn finalize_processed(&self, mut message: OutboxMessage) -> bool {
        let id = message.id;
        message.mark_processed(self.clock.now());

        if self.finalize(message).await {
            metrics::counter!("outbox.processed").increment(1);
            tracing::debug!(id = %id, "Outbox message processed");
            true
        } else {
            false
        }
    }

    async fn finalize_retry(&self, mut message: OutboxMessage, reason: &str) {
        message.register_failure(reason);

        if message.attempt_count >= self.options.max_attempts {
            let attempts = message.attempt_count;
            let id = message.id;
            message.to_dead_letter();
            if self.finalize(message).await {
                metrics::counter!("outbox.dead_lettered").increment(1);
                tracing::error!(
                    id = %id,
                    attempts,
                    instance = %self.options.instance_id,
                    error = reason,
                    "Outbox message moved to dead letter"
                );
            }
            return;
        }

        let delay = self.backoff.delay_for_attempt(message.attempt_count);
        let id = message.id;
        let attempt = message.attempt_count;
        message.to_pending_retry(self.clock.now() + to_chrono(delay));

        if self.finalize(message).await {
            metrics::counter!("outbox.retried").increment(1);
            tracing::warn!(
                id = %id,
                attempt,
                delay_ms = delay.as_millis(),
                error = reason,
                "Outbox dispatch failed, will retry"
            );
        }
    }

    async fn finalize_dead_letter(&self, mut message: OutboxMessage, reason: &str) {
        let id = message.id;
        message.register_failure(reason);
        message.to_dead_letter();

        if self.finalize(message).await {
            metrics::counter!("outbox.dead_lettered").increment(1);
            tracing::error!(
                id = %id,
                instance = %self.options.instance_id,
                error = reason,
                "Outbox message moved to dead letter"
            );
        }
    }

    /// Conditional final update. A conflict means a newer state exists
    /// (expected under contention); other store errors are logged and the
    /// record self-heals via lease expiry.
    async fn finalize(&self, message: OutboxMessage) -> bool {
        let id = message.id;
        match self.store.update(message).await {
            Ok(()) => true,
            Err(e) if e.is_conflict() => {
                tracing::debug!(id = %id, "Finalize lost to newer state, skipping");
                false
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Finalize failed");
                false
            }
        }
    }
}

/// Convert a std duration to chrono, saturating on overflow.
fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}
