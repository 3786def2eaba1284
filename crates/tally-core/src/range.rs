//! Row ranges and dataset partitions.
//!
//! A [`Partition`] is an ordered list of disjoint, contiguous half-open row
//! ranges covering a dataset. The engine shapes it with [`Partition::truncate`]
//! (cap the total number of entries) and [`Partition::merge_to`] (coalesce to
//! at most one range per worker slot) before assigning one range to each slot.

use serde::{Deserialize, Serialize};

/// A half-open range of rows `[begin, end)` processed by one worker slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Index of the slot this range is assigned to.
    pub slot: usize,
    /// First entry in the range.
    pub begin: u64,
    /// One past the last entry in the range.
    pub end: u64,
}

impl Range {
    pub fn new(slot: usize, begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end, "range must not be inverted");
        Range { slot, begin, end }
    }

    /// Number of entries covered by this range.
    pub fn entries(&self) -> u64 {
        self.end - self.begin
    }

    /// Extend this range over an adjacent successor.
    fn join(&mut self, next: &Range) {
        debug_assert_eq!(self.end, next.begin, "ranges must be contiguous");
        self.end = next.end;
    }
}

/// An ordered list of disjoint ranges covering a dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// A fixed partition is taken as-is: truncate and merge become no-ops.
    pub fixed: bool,
    pub parts: Vec<Range>,
}

impl Partition {
    /// Chunk `entries` rows into ranges of at most `max_per_range` entries.
    ///
    /// Zero entries yield an empty partition.
    pub fn new(entries: u64, max_per_range: u64) -> Self {
        debug_assert!(max_per_range > 0, "chunk size must be positive");
        let mut parts = Vec::new();
        let mut begin = 0u64;
        let mut slot = 0usize;
        while begin < entries {
            let end = entries.min(begin + max_per_range);
            parts.push(Range::new(slot, begin, end));
            begin = end;
            slot += 1;
        }
        Partition {
            fixed: false,
            parts,
        }
    }

    /// A partition supplied by the dataset plug-in that must not be reshaped.
    pub fn fixed(parts: Vec<Range>) -> Self {
        Partition { fixed: true, parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Total number of entries across all ranges.
    pub fn total_entries(&self) -> u64 {
        self.parts.iter().map(Range::entries).sum()
    }

    /// Keep the prefix of ranges summing to at most `limit` entries,
    /// splitting the last kept range if needed. No-op on fixed partitions.
    pub fn truncate(&mut self, limit: u64) {
        if self.fixed {
            return;
        }
        let mut remaining = limit;
        let mut kept = Vec::new();
        for part in &self.parts {
            if remaining == 0 {
                break;
            }
            let take = part.entries().min(remaining);
            kept.push(Range::new(part.slot, part.begin, part.begin + take));
            remaining -= take;
        }
        self.parts = kept;
    }

    /// Coalesce adjacent ranges so that at most `max_parts` remain, keeping
    /// the distribution of range counts as even as possible. Slots are
    /// renumbered consecutively. No-op on fixed partitions.
    pub fn merge_to(&mut self, max_parts: usize) {
        if self.fixed || max_parts == 0 || self.parts.len() <= max_parts {
            self.renumber();
            return;
        }
        let groups = max_parts.min(self.parts.len());
        let length = self.parts.len() / groups;
        let remainder = self.parts.len() % groups;
        let mut merged = Vec::with_capacity(groups);
        let mut cursor = 0usize;
        for group in 0..groups {
            let take = length + usize::from(group < remainder);
            let mut combined = self.parts[cursor];
            for part in &self.parts[cursor + 1..cursor + take] {
                combined.join(part);
            }
            combined.slot = group;
            merged.push(combined);
            cursor += take;
        }
        self.parts = merged;
    }

    fn renumber(&mut self) {
        if self.fixed {
            return;
        }
        for (slot, part) in self.parts.iter_mut().enumerate() {
            part.slot = slot;
        }
    }
}
