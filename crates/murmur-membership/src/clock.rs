//! Logical time source
//!
//! Timeouts are counted in ticks of a clock owned by the scheduler, never
//! wall-clock time, so tests can drive time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic logical clock
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Clock advanced explicitly by its owner. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    /// Advance by one tick and return the new time
    pub fn advance(&self) -> u64 {
        self.advance_by(1)
    }

    pub fn advance_by(&self, ticks: u64) -> u64 {
        self.now.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    /// Set an absolute time; never moves backwards
    pub fn set(&self, now: u64) {
        self.now.fetch_max(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
