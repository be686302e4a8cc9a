//! Relay worker loop behavior over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::{DateTime, Utc};
use outbox_relay_core::clock::{Clock, SystemClock};
use outbox_relay_core::config::OutboxOptions;
use outbox_relay_core::message::{ConcurrencyToken, OutboxMessage, OutboxStatus};
use outbox_relay_core::registry::{EventType, TypeRegistry};
use outbox_relay_core::store::{OutboxStats, OutboxStore, OutboxStoreError};
use outbox_relay_runtime::{OutboxDispatcher, OutboxRelay};
use outbox_relay_testing::{InMemoryOutboxStore, ScriptedPublisher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct OrderPlaced;

impl EventType for OrderPlaced {
    const TYPE_KEY: &'static str = "orders.order-placed";
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("outbox_relay_runtime=debug")
        .with_test_writer()
        .try_init();
}

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register::<OrderPlaced>();
    Arc::new(registry)
}

fn fast_options(instance_id: &str) -> OutboxOptions {
    OutboxOptions {
        instance_id: instance_id.to_string(),
        polling_interval: Duration::from_millis(10),
        ..OutboxOptions::default()
    }
}

fn pending_message(now: DateTime<Utc>) -> OutboxMessage {
    OutboxMessage::new(
        uuid::Uuid::new_v4(),
        OrderPlaced::TYPE_KEY,
        1,
        now,
        r#"{"order_id":42}"#,
        now,
    )
}

fn dispatcher_over(
    store: Arc<dyn OutboxStore>,
    publisher: &Arc<ScriptedPublisher>,
    options: OutboxOptions,
) -> OutboxDispatcher {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    OutboxDispatcher::new(store, publisher.clone(), registry(), clock, options)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// In-memory store that fails the first `n` candidate selects, then behaves
/// normally. Models a store that is briefly unreachable.
struct FlakyStore {
    inner: InMemoryOutboxStore,
    select_failures: AtomicUsize,
}

impl FlakyStore {
    fn failing_selects(n: usize) -> Self {
        Self {
            inner: InMemoryOutboxStore::new(),
            select_failures: AtomicUsize::new(n),
        }
    }
}

impl OutboxStore for FlakyStore {
    fn insert(
        &self,
        messages: Vec<OutboxMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        self.inner.insert(messages)
    }

    fn select_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        if self
            .select_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Box::pin(async {
                Err(OutboxStoreError::Database(
                    "injected select failure".to_string(),
                ))
            });
        }
        self.inner.select_candidates(now, limit)
    }

    fn try_claim(
        &self,
        id: uuid::Uuid,
        expected: ConcurrencyToken,
        instance_id: String,
        lease_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        self.inner.try_claim(id, expected, instance_id, lease_until)
    }

    fn get(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        self.inner.get(id)
    }

    fn update(
        &self,
        message: OutboxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        self.inner.update(message)
    }

    fn count_by_status(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OutboxStats, OutboxStoreError>> + Send + '_>> {
        self.inner.count_by_status()
    }

    fn list_dead_letters(
        &self,
        take: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        self.inner.list_dead_letters(take)
    }

    fn requeue(
        &self,
        ids: Vec<uuid::Uuid>,
        reset_attempts: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        self.inner.requeue(ids, reset_attempts, now)
    }

    fn processed_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<uuid::Uuid>, OutboxStoreError>> + Send + '_>> {
        self.inner.processed_older_than(cutoff, limit)
    }

    fn delete(
        &self,
        ids: Vec<uuid::Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        self.inner.delete(ids)
    }
}

#[tokio::test]
async fn relay_publishes_pending_records_until_shutdown() {
    init_tracing();
    let store = Arc::new(InMemoryOutboxStore::new());
    let publisher = Arc::new(ScriptedPublisher::succeeding());

    let message = pending_message(Utc::now());
    let id = message.id;
    store.commit_atomic(|| (), vec![message]);

    let dyn_store: Arc<dyn OutboxStore> = store.clone();
    let dispatcher = dispatcher_over(dyn_store, &publisher, fast_options("worker-relay"));
    let (relay, shutdown) = OutboxRelay::new(dispatcher);
    let handle = relay.spawn();

    wait_for("the record to be published", || {
        publisher.delivered().len() == 1
    })
    .await;

    shutdown.send(true).expect("relay should still be listening");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("relay should stop promptly after shutdown")
        .expect("relay task should not panic");

    let stored = store.snapshot(id).expect("record should exist");
    assert_eq!(stored.status, OutboxStatus::Processed);
}

#[tokio::test]
async fn relay_pauses_after_a_failed_cycle_then_recovers() {
    let store = Arc::new(FlakyStore::failing_selects(1));
    let publisher = Arc::new(ScriptedPublisher::succeeding());

    let message = pending_message(Utc::now());
    let id = message.id;
    store.inner.commit_atomic(|| (), vec![message]);

    let dyn_store: Arc<dyn OutboxStore> = store.clone();
    let dispatcher = dispatcher_over(dyn_store, &publisher, fast_options("worker-flaky"));
    let (relay, shutdown) = OutboxRelay::new(dispatcher);
    let handle = relay.spawn();

    // First cycle hits the injected failure; the loop must keep running and
    // drain the record on a later tick.
    wait_for("the record to be published after the failed cycle", || {
        publisher.delivered().len() == 1
    })
    .await;

    shutdown.send(true).expect("relay should still be listening");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("relay should stop promptly after shutdown")
        .expect("relay task should not panic");

    let stored = store.inner.snapshot(id).expect("record should exist");
    assert_eq!(stored.status, OutboxStatus::Processed);
}

#[tokio::test]
async fn shutdown_interrupts_the_error_pause() {
    let store = Arc::new(FlakyStore::failing_selects(usize::MAX));
    let publisher = Arc::new(ScriptedPublisher::succeeding());

    let dyn_store: Arc<dyn OutboxStore> = store.clone();
    let dispatcher = dispatcher_over(dyn_store, &publisher, fast_options("worker-down"));
    let (relay, shutdown) = OutboxRelay::new(dispatcher);
    let handle = relay.spawn();

    // Let the first cycle fail so the relay is inside its error pause.
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.send(true).expect("relay should still be listening");
    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("relay should stop during the error pause, not after it")
        .expect("relay task should not panic");

    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn cleanup_purges_old_processed_records_on_its_own_cadence() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let publisher = Arc::new(ScriptedPublisher::succeeding());

    let long_ago = Utc::now() - chrono::Duration::days(8);
    let mut old = pending_message(long_ago);
    old.mark_processed(long_ago);
    let id = old.id;
    store.commit_atomic(|| (), vec![old]);

    let options = OutboxOptions {
        cleanup_interval: Duration::from_millis(30),
        ..fast_options("worker-cleanup")
    };
    let dyn_store: Arc<dyn OutboxStore> = store.clone();
    let dispatcher = dispatcher_over(dyn_store, &publisher, options);
    let (relay, shutdown) = OutboxRelay::new(dispatcher);
    let handle = relay.spawn();

    wait_for("the old processed record to be purged", || {
        store.snapshot(id).is_none()
    })
    .await;

    shutdown.send(true).expect("relay should still be listening");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("relay should stop promptly after shutdown")
        .expect("relay task should not panic");
}
