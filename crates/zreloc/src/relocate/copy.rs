//! Copy Statistics - Object Copy Accounting
//!
//! Counters updated by relocating threads. A copy that loses the insert race
//! is not counted as copied; its target allocation is undone when it is still
//! the latest allocation on the target page.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// CopyStats - concurrent copy counters
#[derive(Debug, Default)]
pub struct CopyStats {
    objects_copied: AtomicU64,
    bytes_copied: AtomicU64,
    races_lost: AtomicU64,
    allocations_undone: AtomicU64,
}

impl CopyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy whose forwarding entry was installed
    pub fn record_copy(&self, bytes: usize) {
        self.objects_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A copy that lost the insert race
    pub fn record_race_lost(&self, undone: bool) {
        self.races_lost.fetch_add(1, Ordering::Relaxed);
        if undone {
            self.allocations_undone.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CopyStatsSnapshot {
        CopyStatsSnapshot {
            objects_copied: self.objects_copied.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
            allocations_undone: self.allocations_undone.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.objects_copied.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
        self.races_lost.store(0, Ordering::Relaxed);
        self.allocations_undone.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CopyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStatsSnapshot {
    pub objects_copied: u64,
    pub bytes_copied: u64,
    pub races_lost: u64,
    pub allocations_undone: u64,
}

impl CopyStatsSnapshot {
    /// Combine counters from another cycle
    pub fn merge(&mut self, other: &CopyStatsSnapshot) {
        self.objects_copied += other.objects_copied;
        self.bytes_copied += other.bytes_copied;
        self.races_lost += other.races_lost;
        self.allocations_undone += other.allocations_undone;
    }

    /// Copies performed, including ones that lost the race
    pub fn attempts(&self) -> u64 {
        self.objects_copied + self.races_lost
    }
}
