//! Deep-sleep inhibit accounting.
//!
//! The clock feeding the PDM block and its DMA channel is gated in deep
//! sleep. Every in-flight transfer holds one deep-sleep lock; the idle
//! scheduler asks [`PowerManager::try_enter_deep_sleep`] before gating clocks.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

/// System-wide deep-sleep lock count.
#[derive(Debug, Default)]
pub struct PowerManager {
    deep_sleep_locks: AtomicU32,
}

impl PowerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_deep_sleep(&self) {
        self.deep_sleep_locks.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one lock. Unbalanced unlocks are ignored.
    pub fn unlock_deep_sleep(&self) {
        let released = self
            .deep_sleep_locks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            warn!("deep-sleep unlock without a matching lock");
        }
    }

    pub fn deep_sleep_locks(&self) -> u32 {
        self.deep_sleep_locks.load(Ordering::Acquire)
    }

    pub fn deep_sleep_allowed(&self) -> bool {
        self.deep_sleep_locks() == 0
    }

    /// Deep-sleep transition hook: refuses while any lock is held.
    pub fn try_enter_deep_sleep(&self) -> bool {
        let locks = self.deep_sleep_locks();
        if locks > 0 {
            debug!(locks, "deep sleep refused");
            return false;
        }
        true
    }
}
