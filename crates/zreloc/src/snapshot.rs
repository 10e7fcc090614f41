//! Snapshots - Read-Only Diagnostics
//!
//! Serializable copies of forwarding state for inspection tools. Taking a
//! snapshot only performs acquire loads; it never claims pages or blocks
//! relocating threads beyond the table's shared lock.

use crate::heap::PageSizeClass;
use crate::relocate::{ForwardingRecord, ForwardingTable};
use serde::Serialize;

/// One populated forwarding entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub slot: usize,
    pub from_index: u64,
    pub from_offset: u64,
    pub to_offset: u64,
}

/// State of one forwarding record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSnapshot {
    pub start: u64,
    pub size: usize,
    pub size_class: PageSizeClass,
    pub object_alignment_shift: u32,
    pub ref_count: u32,
    pub capacity: usize,
    pub entries: Vec<EntrySnapshot>,
}

impl RecordSnapshot {
    pub fn capture(record: &ForwardingRecord) -> Self {
        let shift = record.object_alignment_shift();
        let entries = record
            .populated_entries()
            .into_iter()
            .map(|(slot, entry)| EntrySnapshot {
                slot,
                from_index: entry.from_index(),
                from_offset: record.start() + (entry.from_index() << shift),
                to_offset: entry.to_offset(),
            })
            .collect();

        Self {
            start: record.start(),
            size: record.size(),
            size_class: record.size_class(),
            object_alignment_shift: shift,
            ref_count: record.ref_count(),
            capacity: record.capacity(),
            entries,
        }
    }

    /// Fraction of slots in use
    pub fn load_factor(&self) -> f64 {
        self.entries.len() as f64 / self.capacity as f64
    }
}

/// State of the whole forwarding table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    /// Granules with a record
    pub granules: usize,
    pub records: Vec<RecordSnapshot>,
}

impl TableSnapshot {
    pub fn capture(table: &ForwardingTable) -> Self {
        Self {
            granules: table.len(),
            records: table
                .records()
                .iter()
                .map(|record| RecordSnapshot::capture(record))
                .collect(),
        }
    }

    /// Total populated entries
    pub fn forwarded_objects(&self) -> usize {
        self.records.iter().map(|r| r.entries.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
