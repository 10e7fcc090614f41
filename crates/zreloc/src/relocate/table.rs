//! Forwarding Table - Granule to Record Lookup
//!
//! Maps every granule covered by an active forwarding record to that record.
//! Records of medium pages occupy one key per granule they span.
//!
//! Lookup is on the barrier slow path and takes a shared lock; installation
//! and removal happen at phase boundaries under the exclusive lock.

use crate::error::{RelocError, Result};
use crate::relocate::forwarding::ForwardingRecord;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// ForwardingTable - active forwarding records keyed by granule
pub struct ForwardingTable {
    granule_shift: u32,
    records: RwLock<IndexMap<u64, Arc<ForwardingRecord>>>,
}

impl ForwardingTable {
    pub fn new(granule_shift: u32) -> Self {
        Self {
            granule_shift,
            records: RwLock::new(IndexMap::new()),
        }
    }

    fn granule(&self, offset: u64) -> u64 {
        offset >> self.granule_shift
    }

    fn granules(&self, record: &ForwardingRecord) -> std::ops::Range<u64> {
        self.granule(record.start())..self.granule(record.end() - 1) + 1
    }

    /// Record covering `offset`, if any
    pub fn get(&self, offset: u64) -> Option<Arc<ForwardingRecord>> {
        self.records.read().get(&self.granule(offset)).cloned()
    }

    /// Install `record` for every granule of its source page
    ///
    /// # Errors
    /// `ForwardingTableError` if any of those granules already has a record.
    pub fn insert(&self, record: Arc<ForwardingRecord>) -> Result<()> {
        let granules = self.granules(&record);
        let mut records = self.records.write();

        if let Some(taken) = granules.clone().find(|g| records.contains_key(g)) {
            return Err(RelocError::ForwardingTableError(format!(
                "granule {:#x} already forwarded (page {:#x})",
                taken << self.granule_shift,
                record.start()
            )));
        }

        for granule in granules {
            records.insert(granule, Arc::clone(&record));
        }
        Ok(())
    }

    /// Remove `record` from every granule it occupies
    ///
    /// Returns false if the record was not installed.
    pub fn remove(&self, record: &Arc<ForwardingRecord>) -> bool {
        let mut records = self.records.write();
        let mut removed = false;

        for granule in self.granules(record) {
            let owned = records
                .get(&granule)
                .is_some_and(|current| Arc::ptr_eq(current, record));
            if owned {
                records.swap_remove(&granule);
                removed = true;
            }
        }
        removed
    }

    /// Number of granules with a record
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Distinct installed records
    pub fn records(&self) -> Vec<Arc<ForwardingRecord>> {
        let records = self.records.read();
        let mut distinct: Vec<Arc<ForwardingRecord>> = Vec::new();
        for record in records.values() {
            if !distinct.iter().any(|r| Arc::ptr_eq(r, record)) {
                distinct.push(Arc::clone(record));
            }
        }
        distinct
    }
}

impl std::fmt::Debug for ForwardingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingTable")
            .field("granule_shift", &self.granule_shift)
            .field("granules", &self.len())
            .finish()
    }
}
