//! Outbox store trait and related types.
//!
//! The store is the single source of truth and the only shared mutable
//! resource in the relay. It must provide row-level optimistic concurrency:
//! every read returns the record's current [`ConcurrencyToken`] and every
//! mutation is a single conditional update that fails with
//! [`OutboxStoreError::ConcurrencyConflict`] on a token mismatch. No other
//! coordination primitive is assumed.
//!
//! # Implementations
//!
//! - `PostgresOutboxStore` (in `outbox-relay-postgres`): production store
//! - `InMemoryOutboxStore` (in `outbox-relay-testing`): fast, deterministic
//!   testing
//!
//! # Dyn Compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so the dispatcher and admin service can hold an
//! `Arc<dyn OutboxStore>`.

use crate::message::{ConcurrencyToken, OutboxMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during outbox store operations.
#[derive(Error, Debug)]
pub enum OutboxStoreError {
    /// Optimistic concurrency conflict: the record's token no longer matches.
    ///
    /// Expected under contention (another worker claimed or finalized the
    /// record first); callers skip the record rather than treating this as a
    /// failure.
    #[error("Concurrency conflict on outbox message {id}")]
    ConcurrencyConflict {
        /// Id of the contended record.
        id: uuid::Uuid,
    },

    /// Record not found (already deleted or never inserted).
    #[error("Outbox message not found: {0}")]
    NotFound(uuid::Uuid),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Row (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OutboxStoreError {
    /// Whether this error is an expected contention conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Per-status record counts, plus the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    /// Records awaiting dispatch
    pub pending: u64,
    /// Records currently claimed
    pub processing: u64,
    /// Successfully dispatched records
    pub processed: u64,
    /// Dead-lettered records awaiting intervention
    pub dead_letter: u64,
    /// All records
    pub total: u64,
}

/// Durable store for outbox messages with optimistic concurrency control.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: any number of dispatcher instances
/// may operate on one store concurrently; the conditional-update contract is
/// what keeps them from trampling each other.
pub trait OutboxStore: Send + Sync {
    /// Insert freshly captured records.
    ///
    /// This is the standalone insert path. Stores that support joining a
    /// host business transaction (the capture hook's atomicity requirement)
    /// expose that through their own inherent API, since transaction handles
    /// are store-specific.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: insert failed
    fn insert(
        &self,
        messages: Vec<OutboxMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>>;

    /// Select claim candidates at `now`.
    ///
    /// Returns records that are `Pending`, or `Processing` with an expired
    /// lease, with `next_attempt_utc <= now`, ordered by
    /// (`occurred_on_utc`, `enqueued_at_utc`) ascending, at most `limit`.
    /// The ordering is advisory: it sequences consideration, not delivery.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: query failed
    fn select_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>;

    /// Atomically claim a candidate: conditional update keyed on `expected`.
    ///
    /// On success the record becomes `Processing` with `locked_by =
    /// instance_id` and `locked_until_utc = lease_until`, and its token is
    /// advanced.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::ConcurrencyConflict`]: another worker claimed it
    ///   first (expected, skip silently)
    /// - [`OutboxStoreError::NotFound`]: record was deleted
    /// - [`OutboxStoreError::Database`]: update failed
    fn try_claim(
        &self,
        id: uuid::Uuid,
        expected: ConcurrencyToken,
        instance_id: String,
        lease_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>>;

    /// Load a single record by id.
    ///
    /// Returns `None` if the record does not exist (not an error: it may
    /// have been purged between selection and dispatch).
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: query failed
    fn get(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxMessage>, OutboxStoreError>> + Send + '_>>;

    /// Persist a finalized record state: conditional update keyed on
    /// `message.row_version`, advancing the token on success.
    ///
    /// Callers mutate the record through its transition methods first, then
    /// hand it here; the store writes all mutable fields in one statement.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::ConcurrencyConflict`]: token mismatch (a newer
    ///   state exists; skip)
    /// - [`OutboxStoreError::NotFound`]: record was deleted
    /// - [`OutboxStoreError::Database`]: update failed
    fn update(
        &self,
        message: OutboxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>>;

    /// Count records per status.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: query failed
    fn count_by_status(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OutboxStats, OutboxStoreError>> + Send + '_>>;

    /// List dead-lettered records, most recently enqueued first.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: query failed
    fn list_dead_letters(
        &self,
        take: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>;

    /// Reset matched records to `Pending`, immediately eligible.
    ///
    /// Clears lock and diagnostic fields; zeroes attempt counts when
    /// `reset_attempts` is set. Unmatched ids are ignored. Returns the
    /// number of records affected.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: update failed
    fn requeue(
        &self,
        ids: Vec<uuid::Uuid>,
        reset_attempts: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>>;

    /// Ids of `Processed` records with `processed_at_utc < cutoff`, oldest
    /// first, at most `limit`.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: query failed
    fn processed_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<uuid::Uuid>, OutboxStoreError>> + Send + '_>>;

    /// Delete records by id, unconditionally. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// - [`OutboxStoreError::Database`]: delete failed
    fn delete(
        &self,
        ids: Vec<uuid::Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>>;
}
