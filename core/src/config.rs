//! Configuration surface for the relay and its admin service.

use std::time::Duration;

/// Relay configuration.
///
/// # Default Values
///
/// - `polling_interval`: 2 seconds
/// - `cleanup_interval`: 10 minutes
/// - `batch_size`: 50
/// - `lease_duration`: 30 seconds
/// - `max_attempts`: 12
/// - `backoff_base_delay`: 2 seconds
/// - `backoff_max_delay`: 5 minutes
/// - `processed_retention`: 7 days (`None` disables cleanup entirely)
/// - `instance_id`: generated `worker-<uuid>`
/// - `verbose_logging`: false
#[derive(Debug, Clone)]
pub struct OutboxOptions {
    /// How often the dispatcher polls the store
    pub polling_interval: Duration,
    /// How often cleanup runs (independent of the poll cadence)
    pub cleanup_interval: Duration,
    /// How many candidates to claim per dispatch cycle
    pub batch_size: usize,
    /// How long a claim lease is valid
    pub lease_duration: Duration,
    /// Attempts before a record is dead-lettered
    pub max_attempts: i32,
    /// Base delay for retry backoff
    pub backoff_base_delay: Duration,
    /// Cap for retry backoff
    pub backoff_max_delay: Duration,
    /// Delete `Processed` records older than this; `None` keeps them forever
    pub processed_retention: Option<Duration>,
    /// Worker instance id for lease ownership
    pub instance_id: String,
    /// Log poll ticks even when nothing was processed (noisy)
    pub verbose_logging: bool,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(600),
            batch_size: 50,
            lease_duration: Duration::from_secs(30),
            max_attempts: 12,
            backoff_base_delay: Duration::from_secs(2),
            backoff_max_delay: Duration::from_secs(300),
            processed_retention: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            instance_id: generated_instance_id(),
            verbose_logging: false,
        }
    }
}

/// Admin service configuration.
#[derive(Debug, Clone)]
pub struct AdminOptions {
    /// Max ids a single requeue/purge/delete call may touch. Calls above the
    /// cap are rejected outright (never silently truncated).
    pub max_bulk_operation_size: usize,
}

impl Default for AdminOptions {
    fn default() -> Self {
        Self {
            max_bulk_operation_size: 500,
        }
    }
}

/// Generate a unique worker instance id.
fn generated_instance_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4().simple())
}
