//! Operator-facing admin service: stats, dead-letter inspection, requeue,
//! and purge.
//!
//! Bulk operations are capped by [`AdminOptions::max_bulk_operation_size`];
//! an over-cap call is rejected before touching the store, with no partial
//! effect.

use chrono::{DateTime, Utc};
use outbox_relay_core::clock::Clock;
use outbox_relay_core::config::AdminOptions;
use outbox_relay_core::message::OutboxMessage;
use outbox_relay_core::store::{OutboxStats, OutboxStore, OutboxStoreError};
use std::sync::Arc;

/// Clamp bounds for dead-letter listing.
const DEAD_LETTER_TAKE_MIN: usize = 1;
const DEAD_LETTER_TAKE_MAX: usize = 500;

/// Errors returned by admin operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// A bulk call exceeded the configured cap and was rejected outright.
    #[error("bulk operation of {requested} ids exceeds the cap of {max}")]
    BulkLimitExceeded {
        /// Ids in the rejected call
        requested: usize,
        /// Configured cap
        max: usize,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] OutboxStoreError),
}

/// Admin operations over an outbox store.
pub struct OutboxAdmin {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    options: AdminOptions,
}

impl OutboxAdmin {
    /// Create an admin service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>, options: AdminOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }

    /// Counts per lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Store`] if the store query fails.
    pub async fn stats(&self) -> Result<OutboxStats, AdminError> {
        Ok(self.store.count_by_status().await?)
    }

    /// Most recent dead-lettered records, newest first.
    ///
    /// `take` is clamped to `1..=500` rather than rejected, since listing is
    /// read-only.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Store`] if the store query fails.
    pub async fn dead_letters(&self, take: usize) -> Result<Vec<OutboxMessage>, AdminError> {
        let take = take.clamp(DEAD_LETTER_TAKE_MIN, DEAD_LETTER_TAKE_MAX);
        Ok(self.store.list_dead_letters(take).await?)
    }

    /// Requeue the given records as `Pending`, immediately eligible.
    ///
    /// `reset_attempts` zeroes the attempt counter so the full retry budget
    /// applies again; otherwise one more failure dead-letters the record
    /// right away. Returns the number of records actually updated; unknown
    /// ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::BulkLimitExceeded`] when `ids` exceeds the cap
    /// (with zero side effects), or [`AdminError::Store`] on store failure.
    pub async fn requeue(&self, ids: Vec<uuid::Uuid>, reset_attempts: bool) -> Result<u64, AdminError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.check_cap(ids.len())?;

        let requeued = self
            .store
            .requeue(ids, reset_attempts, self.clock.now())
            .await?;

        metrics::counter!("outbox.admin.requeued").increment(requeued);
        tracing::info!(count = requeued, reset_attempts, "Outbox messages requeued");
        Ok(requeued)
    }

    /// Delete `Processed` records older than `cutoff`, up to the bulk cap.
    ///
    /// Bounded rather than exhaustive; call repeatedly to drain a large
    /// backlog. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Store`] if the store fails.
    pub async fn purge_processed_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AdminError> {
        let ids = self
            .store
            .processed_older_than(cutoff, self.options.max_bulk_operation_size)
            .await?;

        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = self.store.delete(ids).await?;
        tracing::info!(count = deleted, %cutoff, "Processed outbox messages purged");
        Ok(deleted)
    }

    /// Hard-delete the given records regardless of status.
    ///
    /// Destroys dead-letter evidence; prefer [`Self::requeue`] or retention
    /// cleanup where possible. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::BulkLimitExceeded`] when `ids` exceeds the cap
    /// (with zero side effects), or [`AdminError::Store`] on store failure.
    pub async fn delete_by_ids(&self, ids: Vec<uuid::Uuid>) -> Result<u64, AdminError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.check_cap(ids.len())?;

        let deleted = self.store.delete(ids).await?;
        tracing::warn!(count = deleted, "Outbox messages hard-deleted by admin");
        Ok(deleted)
    }

    fn check_cap(&self, requested: usize) -> Result<(), AdminError> {
        let max = self.options.max_bulk_operation_size;
        if requested > max {
            return Err(AdminError::BulkLimitExceeded { requested, max });
        }
        Ok(())
    }
}
