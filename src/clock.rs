//! Monotonic clock abstraction, injectable for tests.
//!
//! Production code uses [`SystemClock`]; tests use [`MockClock`] to control `now()` without
//! sleeping, so TTL/stale-sweep behaviour can be asserted deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Anything that can report a monotonic "now".
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;
}

/// Real wall/monotonic clock backed by [`Instant::now`].
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose `now()` is advanced manually, for tests.
///
/// Stores an offset in milliseconds from a fixed epoch `Instant` captured at construction.
pub struct MockClock {
    epoch: Instant,
    offset_ms: AtomicU64,
}

impl MockClock {
    /// Creates a clock frozen at "time zero".
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Advances the clock by `d`.
    pub fn advance(&self, d: Duration) {
        self.offset_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute offset from its epoch.
    pub fn set(&self, offset: Duration) {
        self.offset_ms
            .store(offset.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}
