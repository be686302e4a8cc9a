//! # Outbox Relay Testing
//!
//! Testing utilities for the Outbox Relay.
//!
//! This crate provides:
//! - [`InMemoryOutboxStore`]: a deterministic, mutex-backed `OutboxStore`
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`ScriptedPublisher`]: a publisher mock with programmable failures
//!
//! ## Example
//!
//! ```
//! use outbox_relay_testing::{InMemoryOutboxStore, ScriptedPublisher, test_clock};
//! use outbox_relay_core::clock::Clock;
//!
//! let store = InMemoryOutboxStore::new();
//! let publisher = ScriptedPublisher::failing_times(2);
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! ```

mod memory_store;

pub use memory_store::InMemoryOutboxStore;
pub use mocks::{FixedClock, ManualClock, ScriptedPublisher, test_clock};

/// Mock implementations of the relay's external seams.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use outbox_relay_core::clock::Clock;
    use outbox_relay_core::envelope::OutboxEnvelope;
    use outbox_relay_core::publisher::{OutboxPublisher, PublishError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use outbox_relay_testing::mocks::FixedClock;
    /// use outbox_relay_core::clock::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now()); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Manually advanceable clock for lease-expiry and backoff tests.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at the given time.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut guard = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += by;
        }

        /// Set the clock to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            let mut guard = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Publisher mock with a programmable failure script.
    ///
    /// Counts every publish attempt and records every delivered envelope.
    ///
    /// # Example
    ///
    /// ```
    /// use outbox_relay_testing::mocks::ScriptedPublisher;
    ///
    /// // Fails the first 3 attempts with a retryable error, then succeeds.
    /// let publisher = ScriptedPublisher::failing_times(3);
    /// assert_eq!(publisher.attempts(), 0);
    /// ```
    #[derive(Debug)]
    pub struct ScriptedPublisher {
        fail_first: usize,
        permanent_failure: Option<PublishError>,
        attempts: AtomicUsize,
        delivered: Mutex<Vec<OutboxEnvelope>>,
    }

    impl ScriptedPublisher {
        /// A publisher that always succeeds.
        #[must_use]
        pub const fn succeeding() -> Self {
            Self::with_script(0, None)
        }

        /// Fails the first `n` attempts with a retryable error, then
        /// succeeds.
        #[must_use]
        pub const fn failing_times(n: usize) -> Self {
            Self::with_script(n, None)
        }

        /// Fails every attempt with a retryable error.
        #[must_use]
        pub fn always_failing() -> Self {
            Self::with_script(
                0,
                Some(PublishError::Retryable(
                    "scripted transport failure".to_string(),
                )),
            )
        }

        /// Fails every attempt with the given error.
        #[must_use]
        pub const fn always_failing_with(error: PublishError) -> Self {
            Self::with_script(0, Some(error))
        }

        const fn with_script(fail_first: usize, permanent_failure: Option<PublishError>) -> Self {
            Self {
                fail_first,
                permanent_failure,
                attempts: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        /// Total publish attempts observed so far.
        #[must_use]
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Envelopes that were accepted (publish returned `Ok`).
        #[must_use]
        pub fn delivered(&self) -> Vec<OutboxEnvelope> {
            self.delivered
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl OutboxPublisher for ScriptedPublisher {
        fn publish(
            &self,
            envelope: OutboxEnvelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

            let result = if let Some(error) = &self.permanent_failure {
                Err(error.clone())
            } else if attempt < self.fail_first {
                Err(PublishError::Retryable(format!(
                    "scripted failure on attempt {attempt}"
                )))
            } else {
                self.delivered
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(envelope);
                Ok(())
            };

            Box::pin(async move { result })
        }
    }
}
