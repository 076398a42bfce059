//! # Prize Draw Testing
//!
//! Test doubles for the allocation engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a transactional, fail-point-capable store
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`RecordingEventPublisher`]: captures published domain events
//! - [`fixtures`]: ready-made entities for common scenarios
//!
//! ## Example
//!
//! ```
//! use prizedraw_core::{TransactionalStore, UnitOfWork};
//! use prizedraw_testing::{InMemoryStore, fixtures};
//!
//! # async fn example() -> Result<(), prizedraw_core::StoreError> {
//! let store = InMemoryStore::new();
//! let competition = fixtures::competition(10);
//! store.seed_competition(competition.clone());
//!
//! let tx = store.begin().await?;
//! tx.commit().await?;
//! assert_eq!(store.competition(competition.id), Some(competition));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use prizedraw_core::environment::Clock;

pub mod fixtures;
pub mod memory;
pub mod recording;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use prizedraw_testing::mocks::FixedClock;
    /// use prizedraw_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
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

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep a handle while the
    /// engine owns another.
    ///
    /// ```
    /// use prizedraw_testing::mocks::ManualClock;
    /// use prizedraw_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::days(1));
    /// assert_eq!(clock.now(), start + Duration::days(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    #[allow(clippy::unwrap_used)] // Poisoning only follows a panicking test
    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    #[allow(clippy::unwrap_used)]
    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// The instant [`test_clock`] is stopped at.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

// Re-export commonly used items
pub use memory::{FailPoint, InMemoryStore, InMemoryTx};
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
pub use recording::RecordingEventPublisher;
