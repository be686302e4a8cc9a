//! In-memory outbox store for fast, deterministic tests.

use chrono::{DateTime, Utc};
use outbox_relay_core::message::{ConcurrencyToken, OutboxMessage, OutboxStatus};
use outbox_relay_core::store::{OutboxStats, OutboxStore, OutboxStoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// In-memory [`OutboxStore`] backed by a single mutex-guarded map.
///
/// The mutex makes every operation atomic, which is exactly the row-level
/// conditional-update contract the production store provides: `try_claim`
/// and `update` check the stored [`ConcurrencyToken`] and fail with
/// [`OutboxStoreError::ConcurrencyConflict`] on mismatch, advancing the
/// token on success.
///
/// # Example
///
/// ```
/// use outbox_relay_testing::InMemoryOutboxStore;
///
/// let store = InMemoryOutboxStore::new();
/// assert_eq!(store.len(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    messages: Mutex<HashMap<uuid::Uuid, OutboxMessage>>,
}

impl InMemoryOutboxStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run a business write and insert captured records in one atomic step.
    ///
    /// Stands in for the production store's "insert inside the host
    /// transaction" boundary: either the closure's effects and the records
    /// are both visible, or (if the closure panics) neither insert happens.
    pub fn commit_atomic<F, T>(&self, business_write: F, messages: Vec<OutboxMessage>) -> T
    where
        F: FnOnce() -> T,
    {
        let mut guard = self.lock();
        let result = business_write();
        for message in messages {
            guard.insert(message.id, message);
        }
        result
    }

    /// Direct synchronous read of a record, for test assertions.
    #[must_use]
    pub fn snapshot(&self, id: uuid::Uuid) -> Option<OutboxMessage> {
        self.lock().get(&id).cloned()
    }

    /// All records, unordered, for test assertions.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<OutboxMessage> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<uuid::Uuid, OutboxMessage>> {
        // A poisoned mutex only means another test thread panicked; the data
        // is still usable for assertions.
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn insert(
        &self,
        messages: Vec<OutboxMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        let mut guard = self.lock();
        for message in messages {
            guard.insert(message.id, message);
        }
        drop(guard);
        Box::pin(async { Ok(()) })
    }

    fn select_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        let mut candidates: Vec<OutboxMessage> = self
            .lock()
            .values()
            .filter(|m| m.is_claimable(now))
            .cloned()
            .collect();
        candidates.sort_by_key(|m| (m.occurred_on_utc, m.enqueued_at_utc));
        candidates.truncate(limit);
        Box::pin(async move { Ok(candidates) })
    }

    fn try_claim(
        &self,
        id: uuid::Uuid,
        expected: ConcurrencyToken,
        instance_id: String,
        lease_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        let mut guard = self.lock();
        let result = match guard.get_mut(&id) {
            None => Err(OutboxStoreError::NotFound(id)),
            Some(stored) if stored.row_version != expected => {
                Err(OutboxStoreError::ConcurrencyConflict { id })
            }
            Some(stored) => {
                stored.claim(&instance_id, lease_until);
                stored.row_version = stored.row_version.next();
                Ok(())
            }
        };
        drop(guard);
        Box::pin(async move { result })
    }

    fn get(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        let found = self.lock().get(&id).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn update(
        &self,
        message: OutboxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        let mut guard = self.lock();
        let result = match guard.get_mut(&message.id) {
            None => Err(OutboxStoreError::NotFound(message.id)),
            Some(stored) if stored.row_version != message.row_version => {
                Err(OutboxStoreError::ConcurrencyConflict { id: message.id })
            }
            Some(stored) => {
                let next_token = stored.row_version.next();
                *stored = message;
                stored.row_version = next_token;
                Ok(())
            }
        };
        drop(guard);
        Box::pin(async move { result })
    }

    fn count_by_status(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OutboxStats, OutboxStoreError>> + Send + '_>> {
        let mut stats = OutboxStats::default();
        for message in self.lock().values() {
            match message.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Processed => stats.processed += 1,
                OutboxStatus::DeadLetter => stats.dead_letter += 1,
            }
            stats.total += 1;
        }
        Box::pin(async move { Ok(stats) })
    }

    fn list_dead_letters(
        &self,
        take: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        let mut dead: Vec<OutboxMessage> = self
            .lock()
            .values()
            .filter(|m| m.status == OutboxStatus::DeadLetter)
            .cloned()
            .collect();
        dead.sort_by_key(|m| std::cmp::Reverse(m.enqueued_at_utc));
        dead.truncate(take);
        Box::pin(async move { Ok(dead) })
    }

    fn requeue(
        &self,
        ids: Vec<uuid::Uuid>,
        reset_attempts: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        let mut guard = self.lock();
        let mut affected = 0_u64;
        for id in ids {
            if let Some(stored) = guard.get_mut(&id) {
                stored.requeue(now, reset_attempts);
                stored.row_version = stored.row_version.next();
                affected += 1;
            }
        }
        drop(guard);
        Box::pin(async move { Ok(affected) })
    }

    fn processed_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<uuid::Uuid>, OutboxStoreError>> + Send + '_>> {
        let mut processed: Vec<(DateTime<Utc>, uuid::Uuid)> = self
            .lock()
            .values()
            .filter(|m| m.status == OutboxStatus::Processed)
            .filter_map(|m| {
                m.processed_at_utc
                    .filter(|at| *at < cutoff)
                    .map(|at| (at, m.id))
            })
            .collect();
        processed.sort_by_key(|(at, _)| *at);
        processed.truncate(limit);
        let ids = processed.into_iter().map(|(_, id)| id).collect();
        Box::pin(async move { Ok(ids) })
    }

    fn delete(
        &self,
        ids: Vec<uuid::Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        let mut guard = self.lock();
        let mut deleted = 0_u64;
        for id in ids {
            if guard.remove(&id).is_some() {
                deleted += 1;
            }
        }
        drop(guard);
        Box::pin(async move { Ok(deleted) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_message(now: DateTime<Utc>) -> OutboxMessage {
        OutboxMessage::new(
            uuid::Uuid::new_v4(),
            "test.event",
            1,
            now,
            "{}",
            now,
        )
    }

    #[tokio::test]
    async fn insert_and_select_candidates() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let older = {
            let mut m = pending_message(now);
            m.occurred_on_utc = now - Duration::seconds(10);
            m
        };
        let newer = pending_message(now);
        let older_id = older.id;

        store
            .insert(vec![newer, older])
            .await
            .expect("insert should succeed");

        let candidates = store
            .select_candidates(now, 10)
            .await
            .expect("select should succeed");
        assert_eq!(candidates.len(), 2);
        // Ordered by occurred_on ascending.
        assert_eq!(candidates[0].id, older_id);
    }

    #[tokio::test]
    async fn second_claim_with_stale_token_conflicts() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let message = pending_message(now);
        let id = message.id;
        let token = message.row_version;
        store
            .insert(vec![message])
            .await
            .expect("insert should succeed");

        let lease = now + Duration::seconds(30);
        store
            .try_claim(id, token, "worker-a".to_string(), lease)
            .await
            .expect("first claim should win");

        let second = store
            .try_claim(id, token, "worker-b".to_string(), lease)
            .await;
        assert!(matches!(
            second,
            Err(OutboxStoreError::ConcurrencyConflict { .. })
        ));

        // Loser observed no state change.
        let stored = store.snapshot(id).expect("record should exist");
        assert_eq!(stored.locked_by.as_deref(), Some("worker-a"));
    }

    #[tokio::test]
    async fn update_with_stale_token_conflicts() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let message = pending_message(now);
        let id = message.id;
        let stale = message.clone();
        store
            .insert(vec![message])
            .await
            .expect("insert should succeed");

        store
            .try_claim(id, stale.row_version, "worker-a".to_string(), now)
            .await
            .expect("claim should succeed");

        // `stale` still carries the pre-claim token.
        let result = store.update(stale).await;
        assert!(matches!(
            result,
            Err(OutboxStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn commit_atomic_inserts_with_business_write() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let message = pending_message(now);
        let id = message.id;

        let order_total = store.commit_atomic(|| 99_u32, vec![message]);

        assert_eq!(order_total, 99);
        assert!(store.snapshot(id).is_some());
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();

        let pending = pending_message(now);
        let mut processed = pending_message(now);
        processed.mark_processed(now);
        let mut dead = pending_message(now);
        dead.to_dead_letter();

        store
            .insert(vec![pending, processed, dead])
            .await
            .expect("insert should succeed");

        let stats = store
            .count_by_status()
            .await
            .expect("stats should succeed");
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.total, 3);
    }
}
