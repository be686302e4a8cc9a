//! Long-running relay worker: polls the dispatcher and runs cleanup.

use crate::dispatcher::OutboxDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Pause after a failed cycle before polling again.
const ERROR_PAUSE: Duration = Duration::from_secs(2);

/// Drives an [`OutboxDispatcher`] on a polling cadence until shutdown.
///
/// Construction hands back a [`watch::Sender`]; send `true` (or drop the
/// sender) to stop the loop. Cleanup runs on its own interval, piggybacked
/// on poll ticks so a single task services both.
///
/// # Example
///
/// ```ignore
/// let (relay, shutdown) = OutboxRelay::new(dispatcher);
/// let handle = relay.spawn();
///
/// // ... later ...
/// let _ = shutdown.send(true);
/// handle.await?;
/// ```
pub struct OutboxRelay {
    dispatcher: Arc<OutboxDispatcher>,
    shutdown: watch::Receiver<bool>,
}

impl OutboxRelay {
    /// Create a relay and the sender that stops it.
    #[must_use]
    pub fn new(dispatcher: OutboxDispatcher) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                dispatcher: Arc::new(dispatcher),
                shutdown: rx,
            },
            tx,
        )
    }

    /// Spawn the relay onto the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the poll loop until the shutdown signal flips to `true` or the
    /// sender is dropped.
    ///
    /// A failed dispatch cycle is logged and followed by a short pause; the
    /// loop itself never exits on error. The pause, like every other wait in
    /// the loop, still observes the shutdown signal.
    pub async fn run(self) {
        let dispatcher = self.dispatcher;
        let mut shutdown = self.shutdown;
        // Separate handle so the dispatcher can observe shutdown mid-batch
        // while this loop awaits `changed`.
        let batch_view = shutdown.clone();

        let options = dispatcher.options().clone();
        let mut poll = tokio::time::interval(options.polling_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_cleanup = Instant::now() + options.cleanup_interval;

        tracing::info!(
            instance = %options.instance_id,
            poll_ms = options.polling_interval.as_millis(),
            "Outbox relay started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = poll.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match dispatcher.dispatch_once(&batch_view).await {
                Ok(0) => {
                    if options.verbose_logging {
                        tracing::debug!("Outbox poll found no work");
                    }
                }
                Ok(count) => {
                    tracing::info!(count, "Outbox dispatch cycle complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Outbox dispatch cycle failed");
                    tokio::select! {
                        () = tokio::time::sleep(ERROR_PAUSE) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }

            if Instant::now() >= next_cleanup {
                match dispatcher.cleanup_once().await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        tracing::info!(deleted, "Outbox cleanup complete");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Outbox cleanup failed");
                    }
                }
                next_cleanup = Instant::now() + options.cleanup_interval;
            }
        }

        tracing::info!(instance = %options.instance_id, "Outbox relay stopped");
    }
}
