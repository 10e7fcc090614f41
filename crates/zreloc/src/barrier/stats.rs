//! Barrier Statistics - Load Barrier Path Counters
//!
//! Metrics tracked:
//! - Total barrier invocations
//! - Fast path hits (weak-good or null)
//! - Slow-Relocate and Slow-Remap resolutions
//! - Reference fields healed in place

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by barrier calls
#[derive(Debug, Default)]
pub struct BarrierCounters {
    invocations: AtomicU64,
    fast_path: AtomicU64,
    null_references: AtomicU64,
    slow_relocate: AtomicU64,
    slow_remap: AtomicU64,
    objects_relocated: AtomicU64,
    healed: AtomicU64,
}

impl BarrierCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_fast(&self, null: bool) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.fast_path.fetch_add(1, Ordering::Relaxed);
        if null {
            self.null_references.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_relocate(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.slow_relocate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_remap(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.slow_remap.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_object_relocated(&self) {
        self.objects_relocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_healed(&self) {
        self.healed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BarrierStats {
        let mut stats = BarrierStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            fast_path: self.fast_path.load(Ordering::Relaxed),
            null_references: self.null_references.load(Ordering::Relaxed),
            slow_relocate: self.slow_relocate.load(Ordering::Relaxed),
            slow_remap: self.slow_remap.load(Ordering::Relaxed),
            objects_relocated: self.objects_relocated.load(Ordering::Relaxed),
            healed: self.healed.load(Ordering::Relaxed),
            fast_path_rate: 0.0,
        };
        stats.recalculate_fast_path_rate();
        stats
    }

    pub fn reset(&self) {
        for counter in [
            &self.invocations,
            &self.fast_path,
            &self.null_references,
            &self.slow_relocate,
            &self.slow_remap,
            &self.objects_relocated,
            &self.healed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// BarrierStats - point-in-time barrier statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarrierStats {
    /// Total barrier invocations
    pub invocations: u64,
    /// Weak-good or null references (fast path)
    pub fast_path: u64,
    /// Null references (subset of the fast path)
    pub null_references: u64,
    /// Stale references resolved during Relocate
    pub slow_relocate: u64,
    /// Stale references resolved outside Relocate
    pub slow_remap: u64,
    /// Objects copied by the barrier itself
    pub objects_relocated: u64,
    /// Reference fields updated in place
    pub healed: u64,
    /// Fast path success rate (percentage)
    pub fast_path_rate: f64,
}

impl BarrierStats {
    /// Merge stats from another source (for aggregation)
    pub fn merge(&mut self, other: &BarrierStats) {
        self.invocations += other.invocations;
        self.fast_path += other.fast_path;
        self.null_references += other.null_references;
        self.slow_relocate += other.slow_relocate;
        self.slow_remap += other.slow_remap;
        self.objects_relocated += other.objects_relocated;
        self.healed += other.healed;
        self.recalculate_fast_path_rate();
    }

    fn recalculate_fast_path_rate(&mut self) {
        self.fast_path_rate = if self.invocations == 0 {
            100.0
        } else {
            (self.fast_path as f64 / self.invocations as f64) * 100.0
        };
    }

    pub fn slow_path_count(&self) -> u64 {
        self.slow_relocate + self.slow_remap
    }
}

impl Default for BarrierStats {
    fn default() -> Self {
        Self {
            invocations: 0,
            fast_path: 0,
            null_references: 0,
            slow_relocate: 0,
            slow_remap: 0,
            objects_relocated: 0,
            healed: 0,
            fast_path_rate: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let counters = BarrierCounters::new();
        counters.record_fast(false);
        counters.record_fast(true);
        counters.record_fast(false);
        counters.record_relocate();
        counters.record_healed();

        let stats = counters.snapshot();
        assert_eq!(stats.invocations, 4);
        assert_eq!(stats.fast_path, 3);
        assert_eq!(stats.null_references, 1);
        assert_eq!(stats.slow_path_count(), 1);
        assert_eq!(stats.healed, 1);
        assert!((stats.fast_path_rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_rate_and_reset() {
        let counters = BarrierCounters::new();
        assert_eq!(counters.snapshot(), BarrierStats::default());

        counters.record_remap();
        counters.reset();
        assert_eq!(counters.snapshot().invocations, 0);
    }

    #[test]
    fn test_merge() {
        let mut total = BarrierStats::default();
        total.merge(&BarrierStats {
            invocations: 10,
            fast_path: 5,
            ..Default::default()
        });
        assert!((total.fast_path_rate - 50.0).abs() < f64::EPSILON);
    }
}
