//! Throughput Counter
//!
//! Process-wide count of price bar writes issued to the store. Incremented
//! by batch size at submission time, so it reflects issued rather than
//! acknowledged writes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter of issued price bar writes.
#[derive(Debug, Default)]
pub struct ThroughputCounter {
    issued: AtomicU64,
}

impl ThroughputCounter {
    /// Create a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
        }
    }

    /// Add `count` issued writes.
    pub fn add(&self, count: u64) {
        self.issued.fetch_add(count, Ordering::Relaxed);
    }

    /// Writes issued so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
