//! Ordered sets of global indices, stored as sorted disjoint half-open ranges.
//!
//! `IndexSet` describes which entries of a distributed index space a rank
//! owns (or can read). Positions within the set ("local indices") follow
//! ascending global order, so `nth_index_in_set` and `index_within_set` are
//! inverse to each other.

use crate::amge_error::AmgeError;
use std::ops::Range;

/// Sorted, non-overlapping, non-adjacent ranges over `[0, size)`.
///
/// # Invariants
/// - every range is non-empty and lies within `[0, size)`,
/// - ranges are sorted and separated by at least one missing index.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexSet {
    size: u64,
    ranges: Vec<Range<u64>>,
}

impl IndexSet {
    /// Empty set over an index space of `size` entries.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ranges: Vec::new(),
        }
    }

    /// The complete index space `[0, size)`.
    pub fn complete(size: u64) -> Self {
        let mut set = Self::new(size);
        if size > 0 {
            set.ranges.push(0..size);
        }
        set
    }

    /// Set holding exactly `range`.
    pub fn from_range(size: u64, range: Range<u64>) -> Result<Self, AmgeError> {
        let mut set = Self::new(size);
        set.add_range(range)?;
        Ok(set)
    }

    /// Size of the surrounding index space.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of indices in the set.
    pub fn n_elements(&self) -> usize {
        self.ranges.iter().map(|r| (r.end - r.start) as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True when the set is a single range (or empty).
    pub fn is_contiguous(&self) -> bool {
        self.ranges.len() <= 1
    }

    /// The sorted ranges making up the set.
    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    /// Insert a single index.
    pub fn add_index(&mut self, index: u64) -> Result<(), AmgeError> {
        self.add_range(index..index + 1)
    }

    /// Insert every index of `range`, merging with neighbors.
    pub fn add_range(&mut self, range: Range<u64>) -> Result<(), AmgeError> {
        if range.end > self.size {
            return Err(AmgeError::IndexOutOfRange {
                index: range.end - 1,
                size: self.size,
            });
        }
        if range.is_empty() {
            return Ok(());
        }
        // first range whose end reaches the new start (adjacent ranges merge)
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        // first range starting strictly after the new end
        let hi = self.ranges.partition_point(|r| r.start <= range.end);
        let mut merged = range;
        if lo < hi {
            merged.start = merged.start.min(self.ranges[lo].start);
            merged.end = merged.end.max(self.ranges[hi - 1].end);
        }
        self.ranges.splice(lo..hi, std::iter::once(merged));
        Ok(())
    }

    /// Membership test, `O(log #ranges)`.
    pub fn is_element(&self, index: u64) -> bool {
        let pos = self.ranges.partition_point(|r| r.end <= index);
        self.ranges.get(pos).is_some_and(|r| r.contains(&index))
    }

    /// Global index of the `n`-th element (ascending order).
    pub fn nth_index_in_set(&self, n: usize) -> Option<u64> {
        let mut remaining = n as u64;
        for r in &self.ranges {
            let len = r.end - r.start;
            if remaining < len {
                return Some(r.start + remaining);
            }
            remaining -= len;
        }
        None
    }

    /// Position of `index` within the set, if it is an element.
    pub fn index_within_set(&self, index: u64) -> Option<usize> {
        let mut before = 0u64;
        for r in &self.ranges {
            if index < r.start {
                return None;
            }
            if index < r.end {
                return Some((before + index - r.start) as usize);
            }
            before += r.end - r.start;
        }
        None
    }

    /// Iterate over the elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }
}

impl<'a> IntoIterator for &'a IndexSet {
    type Item = u64;
    type IntoIter = Box<dyn Iterator<Item = u64> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
