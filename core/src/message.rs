//! The durable outbox message record and its lifecycle state machine.
//!
//! An [`OutboxMessage`] is the unit of work the relay operates on. It is
//! created once, atomically with the business write that produced its event,
//! and afterwards mutated only through the transition methods defined here.
//! Every persisted mutation must be guarded by the record's
//! [`ConcurrencyToken`] so a stale reader can never overwrite newer state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum stored length of a diagnostic error message, in characters.
pub const MAX_LAST_ERROR_LEN: usize = 2000;

/// Error raised when a status string from the store is unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid outbox status: {0}")]
pub struct ParseStatusError(String);

/// Lifecycle status of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for dispatch (eligible once `next_attempt_utc` has passed)
    Pending,
    /// Claimed by a worker holding an unexpired lease
    Processing,
    /// Successfully published to the transport
    Processed,
    /// Retry budget exhausted or failed validation; requires manual intervention
    DeadLetter,
}

impl OutboxStatus {
    /// Convert status to its stable store string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Parse status from its store string representation.
    ///
    /// # Errors
    ///
    /// Returns [`ParseStatusError`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "dead_letter" => Ok(Self::DeadLetter),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque optimistic-concurrency token for an outbox message row.
///
/// The store returns the current token on every read and requires it on every
/// write; a mismatch fails the write with a concurrency conflict instead of
/// silently overwriting newer state. The token is comparable but otherwise
/// opaque to callers; only the store increments it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcurrencyToken(i64);

impl ConcurrencyToken {
    /// Token of a freshly inserted row.
    pub const INITIAL: Self = Self(0);

    /// Create a token from its raw store value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw store value of the token.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The token a successful conditional update advances the row to.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable outbox message record.
///
/// Field mutations outside the transition methods are possible (fields are
/// public so stores can hydrate rows) but dispatch and admin code must go
/// through [`claim`](Self::claim), [`mark_processed`](Self::mark_processed),
/// [`register_failure`](Self::register_failure),
/// [`to_pending_retry`](Self::to_pending_retry),
/// [`to_dead_letter`](Self::to_dead_letter) and [`requeue`](Self::requeue)
/// so the state machine stays coherent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Primary key, generated at capture time
    pub id: uuid::Uuid,

    /// Logical event id, used by downstream consumers for idempotent handling
    pub event_id: uuid::Uuid,

    /// Stable type key resolved through the type registry
    pub type_key: String,

    /// Payload schema version
    pub version: i32,

    /// When the business event occurred (UTC)
    pub occurred_on_utc: DateTime<Utc>,

    /// When the record was inserted into the outbox (UTC)
    pub enqueued_at_utc: DateTime<Utc>,

    /// When the record was successfully dispatched (UTC)
    pub processed_at_utc: Option<DateTime<Utc>>,

    /// Current lifecycle status
    pub status: OutboxStatus,

    /// Number of failed dispatch attempts so far
    pub attempt_count: i32,

    /// The record is not eligible for claim before this time (UTC)
    pub next_attempt_utc: DateTime<Utc>,

    /// Lease expiry (UTC); once passed, other workers may reclaim
    pub locked_until_utc: Option<DateTime<Utc>>,

    /// Instance id of the worker currently holding the lease
    pub locked_by: Option<String>,

    /// Last dispatch error, truncated to [`MAX_LAST_ERROR_LEN`] (diagnostic only)
    pub last_error: Option<String>,

    /// Arbitrary transport headers (JSON), opaque to the dispatcher
    pub headers_json: Option<String>,

    /// Serialized event payload (JSON), opaque to the dispatcher
    pub payload_json: String,

    /// Payload content type
    pub content_type: String,

    /// Optional correlation id for tracing
    pub correlation_id: Option<String>,

    /// Optimistic-concurrency token; required on every conditional update
    pub row_version: ConcurrencyToken,
}

impl OutboxMessage {
    /// Create a new pending record for a captured domain event.
    ///
    /// The record is immediately eligible for dispatch (`next_attempt_utc =
    /// now`) with a zero attempt count.
    #[must_use]
    pub fn new(
        event_id: uuid::Uuid,
        type_key: impl Into<String>,
        version: i32,
        occurred_on_utc: DateTime<Utc>,
        payload_json: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_id,
            type_key: type_key.into(),
            version,
            occurred_on_utc,
            enqueued_at_utc: now,
            processed_at_utc: None,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_utc: now,
            locked_until_utc: None,
            locked_by: None,
            last_error: None,
            headers_json: None,
            payload_json: payload_json.into(),
            content_type: "application/json".to_string(),
            correlation_id: None,
            row_version: ConcurrencyToken::INITIAL,
        }
    }

    /// Whether the lease (if any) has expired at `now`.
    ///
    /// A record without lock fields counts as expired: nothing owns it.
    #[must_use]
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_until_utc.is_none_or(|until| until < now)
    }

    /// Whether `instance_id` holds an unexpired lease on this record.
    #[must_use]
    pub fn is_owned_by(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        self.locked_by.as_deref() == Some(instance_id) && !self.is_lease_expired(now)
    }

    /// Whether this record is a claim candidate at `now`.
    ///
    /// Pending records are eligible once `next_attempt_utc` has passed,
    /// regardless of stale lock fields; Processing records only once their
    /// lease has expired (crashed-owner recovery).
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.next_attempt_utc > now {
            return false;
        }
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Processing => self.is_lease_expired(now),
            OutboxStatus::Processed | OutboxStatus::DeadLetter => false,
        }
    }

    /// Transition `Pending → Processing`: take the lease.
    pub fn claim(&mut self, instance_id: &str, lease_until: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.locked_by = Some(instance_id.to_string());
        self.locked_until_utc = Some(lease_until);
    }

    /// Transition `Processing → Processed`: publish succeeded.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processed;
        self.processed_at_utc = Some(now);
        self.locked_until_utc = None;
        self.locked_by = None;
        self.last_error = None;
    }

    /// Record a failed dispatch attempt: increments the attempt count and
    /// stores the (truncated) diagnostic. Does not change status; callers
    /// follow up with [`to_pending_retry`](Self::to_pending_retry) or
    /// [`to_dead_letter`](Self::to_dead_letter).
    pub fn register_failure(&mut self, error: &str) {
        self.attempt_count += 1;
        self.last_error = Some(truncate_error(error));
    }

    /// Transition `Processing → Pending` after a retryable failure.
    ///
    /// Lock fields are cleared so other workers are not blocked once
    /// `next_attempt_utc` passes.
    pub fn to_pending_retry(&mut self, next_attempt_utc: DateTime<Utc>) {
        self.status = OutboxStatus::Pending;
        self.next_attempt_utc = next_attempt_utc;
        self.locked_until_utc = None;
        self.locked_by = None;
    }

    /// Transition to `DeadLetter`: retry budget exhausted or validation
    /// failed. Clears lock fields; no further automatic retry.
    pub fn to_dead_letter(&mut self) {
        self.status = OutboxStatus::DeadLetter;
        self.locked_until_utc = None;
        self.locked_by = None;
    }

    /// Admin-only transition back to `Pending`, immediately eligible.
    ///
    /// Clears lock and diagnostic fields; `reset_attempts` additionally
    /// zeroes the attempt count so the full retry budget is restored.
    pub fn requeue(&mut self, now: DateTime<Utc>, reset_attempts: bool) {
        self.status = OutboxStatus::Pending;
        self.next_attempt_utc = now;
        self.locked_until_utc = None;
        self.locked_by = None;
        self.last_error = None;
        if reset_attempts {
            self.attempt_count = 0;
        }
    }
}

/// Truncate a diagnostic message to [`MAX_LAST_ERROR_LEN`] characters.
fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_LAST_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_LAST_ERROR_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> OutboxMessage {
        OutboxMessage::new(
            uuid::Uuid::new_v4(),
            "orders.order-placed",
            1,
            now,
            r#"{"order_id":42}"#,
            now,
        )
    }

    #[test]
    fn status_roundtrip() {
        for status in &[
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Processed,
            OutboxStatus::DeadLetter,
        ] {
            let parsed = OutboxStatus::parse(status.as_str());
            assert_eq!(parsed, Ok(*status));
        }
    }

    #[test]
    fn status_invalid() {
        assert!(OutboxStatus::parse("resolved").is_err());
    }

    #[test]
    fn new_record_is_immediately_claimable() {
        let now = Utc::now();
        let msg = sample(now);
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempt_count, 0);
        assert_eq!(msg.row_version, ConcurrencyToken::INITIAL);
        assert!(msg.is_claimable(now));
    }

    #[test]
    fn claim_sets_processing_and_lease() {
        let now = Utc::now();
        let mut msg = sample(now);
        let lease_until = now + Duration::seconds(30);

        msg.claim("worker-1", lease_until);

        assert_eq!(msg.status, OutboxStatus::Processing);
        assert_eq!(msg.locked_by.as_deref(), Some("worker-1"));
        assert_eq!(msg.locked_until_utc, Some(lease_until));
        assert!(msg.is_owned_by("worker-1", now));
        assert!(!msg.is_owned_by("worker-2", now));
        assert!(!msg.is_claimable(now));
    }

    #[test]
    fn expired_lease_makes_processing_claimable_again() {
        let now = Utc::now();
        let mut msg = sample(now);
        msg.claim("worker-1", now + Duration::seconds(30));

        let later = now + Duration::seconds(31);
        assert!(msg.is_lease_expired(later));
        assert!(!msg.is_owned_by("worker-1", later));
        assert!(msg.is_claimable(later));
    }

    #[test]
    fn mark_processed_clears_lock_and_error() {
        let now = Utc::now();
        let mut msg = sample(now);
        msg.claim("worker-1", now + Duration::seconds(30));
        msg.last_error = Some("previous failure".to_string());

        msg.mark_processed(now);

        assert_eq!(msg.status, OutboxStatus::Processed);
        assert_eq!(msg.processed_at_utc, Some(now));
        assert!(msg.locked_by.is_none());
        assert!(msg.locked_until_utc.is_none());
        assert!(msg.last_error.is_none());
        assert!(!msg.is_claimable(now));
    }

    #[test]
    fn retry_transition_clears_lock_and_defers() {
        let now = Utc::now();
        let mut msg = sample(now);
        msg.claim("worker-1", now + Duration::seconds(30));

        msg.register_failure("connection refused");
        msg.to_pending_retry(now + Duration::seconds(4));

        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempt_count, 1);
        assert_eq!(msg.last_error.as_deref(), Some("connection refused"));
        assert!(msg.locked_by.is_none());
        assert!(!msg.is_claimable(now));
        assert!(msg.is_claimable(now + Duration::seconds(5)));
    }

    #[test]
    fn dead_letter_is_terminal_for_claims() {
        let now = Utc::now();
        let mut msg = sample(now);
        msg.claim("worker-1", now + Duration::seconds(30));
        msg.register_failure("boom");
        msg.to_dead_letter();

        assert_eq!(msg.status, OutboxStatus::DeadLetter);
        assert!(msg.locked_by.is_none());
        assert!(!msg.is_claimable(now + Duration::days(1)));
    }

    #[test]
    fn requeue_resets_or_preserves_attempts() {
        let now = Utc::now();
        let mut msg = sample(now);
        msg.register_failure("a");
        msg.register_failure("b");
        msg.to_dead_letter();

        let mut preserved = msg.clone();
        preserved.requeue(now, false);
        assert_eq!(preserved.status, OutboxStatus::Pending);
        assert_eq!(preserved.attempt_count, 2);
        assert!(preserved.last_error.is_none());

        msg.requeue(now, true);
        assert_eq!(msg.attempt_count, 0);
        assert_eq!(msg.next_attempt_utc, now);
        assert!(msg.is_claimable(now));
    }

    #[test]
    fn long_errors_are_truncated() {
        let now = Utc::now();
        let mut msg = sample(now);
        let long = "x".repeat(MAX_LAST_ERROR_LEN + 100);

        msg.register_failure(&long);

        let stored = msg.last_error.as_deref().map(|s| s.chars().count());
        assert_eq!(stored, Some(MAX_LAST_ERROR_LEN));
    }

    #[test]
    fn token_advances() {
        let t = ConcurrencyToken::INITIAL;
        assert_eq!(t.value(), 0);
        assert_eq!(t.next(), ConcurrencyToken::new(1));
        assert!(t < t.next());
    }
}
