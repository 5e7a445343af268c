//! Config & tunables (component M).
//!
//! Plain structs with `Default`, constructed by the caller — no global
//! mutable state besides these tunables, matching the no-hidden-state
//! policy for the rest of the crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// LRU capacities and the debug cross-check switch.
#[derive(Debug, Clone, Copy)]
pub struct Tunable {
    /// Node cache capacity (component F/N).
    pub node_cache_size: usize,
    /// Skinny path arena item cache capacity (component J).
    pub path_item_cache_size: usize,
    /// Slice pool per-bucket capacity (component C).
    pub slice_pool_size: usize,
    /// Whether the volume mapper re-derives and cross-checks its reverse
    /// map after every `add_mapping` (component D).
    pub debug_cross_check: bool,
    /// Progress reporter flush interval, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for Tunable {
    fn default() -> Self {
        Self {
            node_cache_size: 4096,
            path_item_cache_size: 16384,
            slice_pool_size: 256,
            debug_cross_check: false,
            progress_interval_ms: 500,
        }
    }
}

/// A cheap, clonable cancellation flag polled at node/item boundaries.
///
/// Cancelling is a one-way operation: once set, a token never un-cancels.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` if this token has been cancelled.
    pub fn check(&self) -> Result<(), crate::error::Cancelled> {
        if self.is_cancelled() {
            Err(crate::error::Cancelled)
        } else {
            Ok(())
        }
    }
}
