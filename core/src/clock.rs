//! Clock abstraction for testable time.

use chrono::{DateTime, Utc};

/// Abstracts "now" so lease, backoff, and retention logic is deterministic
/// under test.
///
/// # Examples
///
/// ```
/// use outbox_relay_core::clock::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let t1 = clock.now();
/// let t2 = clock.now();
/// assert!(t2 >= t1);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time (UTC).
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
