//! Contiguous ownership layout of a distributed index space.
//!
//! Rank `r` owns `[starts[r], starts[r + 1])`. Layouts are built
//! collectively: each rank contributes its local size and the offsets are
//! the exclusive prefix sums, so owned indices are numbered first by rank
//! (ascending) and then in local order.

use crate::algs::collective::allgather_u64;
use crate::algs::communicator::Communicator;
use crate::amge_error::AmgeError;
use crate::linalg::index_set::IndexSet;
use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexPartition {
    /// `n_ranks + 1` monotone offsets; the last one is the global size.
    starts: Vec<u64>,
}

impl IndexPartition {
    /// Collective: every rank passes its number of owned indices.
    pub fn from_local_size<C: Communicator>(n_local: u64, comm: &C) -> Self {
        let sizes = allgather_u64(comm, n_local);
        Self::from_sizes(&sizes)
    }

    /// Layout from the per-rank sizes.
    pub fn from_sizes(sizes: &[u64]) -> Self {
        let mut starts = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0u64;
        starts.push(0);
        for &s in sizes {
            acc += s;
            starts.push(acc);
        }
        Self { starts }
    }

    /// Collective: derive the layout from each rank's owned set, which must
    /// be contiguous and line up with the other ranks' sets.
    pub fn from_owned_set<C: Communicator>(owned: &IndexSet, comm: &C) -> Result<Self, AmgeError> {
        if !owned.is_contiguous() {
            return Err(AmgeError::InvalidMesh(format!(
                "rank {} owns a non-contiguous index set ({} ranges)",
                comm.rank(),
                owned.ranges().len()
            )));
        }
        let begin = owned.ranges().first().map_or(0, |r| r.start);
        let layout = Self::from_local_size(owned.n_elements() as u64, comm);
        let expected = layout.local_range(comm.rank()).start;
        if !owned.is_empty() && begin != expected {
            return Err(AmgeError::InvalidMesh(format!(
                "rank {} owns indices starting at {begin}, but rank order implies {expected}",
                comm.rank()
            )));
        }
        if layout.size() != owned.size() {
            return Err(AmgeError::DimensionMismatch {
                context: "owned index sets",
                expected: owned.size() as usize,
                got: layout.size() as usize,
            });
        }
        Ok(layout)
    }

    /// Global size of the index space.
    pub fn size(&self) -> u64 {
        *self.starts.last().unwrap_or(&0)
    }

    pub fn n_ranks(&self) -> usize {
        self.starts.len().saturating_sub(1)
    }

    /// Half-open range owned by `rank` (empty for unknown ranks).
    pub fn local_range(&self, rank: usize) -> Range<u64> {
        match (self.starts.get(rank), self.starts.get(rank + 1)) {
            (Some(&a), Some(&b)) => a..b,
            _ => 0..0,
        }
    }

    /// Number of indices owned by `rank`.
    pub fn local_size(&self, rank: usize) -> usize {
        let r = self.local_range(rank);
        (r.end - r.start) as usize
    }

    /// Rank that owns `index`.
    pub fn owner_of(&self, index: u64) -> Result<usize, AmgeError> {
        if index >= self.size() {
            return Err(AmgeError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        // last start <= index; empty ranks share a start, pick the one that owns it
        let pos = self.starts.partition_point(|&s| s <= index);
        Ok(pos - 1)
    }

    /// Owned range of `rank` as an [`IndexSet`].
    pub fn owned_set(&self, rank: usize) -> IndexSet {
        let mut set = IndexSet::new(self.size());
        // in-bounds by construction
        let _ = set.add_range(self.local_range(rank));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn owner_skips_empty_ranks() {
        let p = IndexPartition::from_sizes(&[3, 0, 2]);
        assert_eq!(p.size(), 5);
        assert_eq!(p.owner_of(2).unwrap(), 0);
        assert_eq!(p.owner_of(3).unwrap(), 2);
        assert_eq!(p.local_range(1), 3..3);
        assert!(p.owner_of(5).is_err());
    }

    #[test]
    fn serial_layout_from_owned_set() {
        let owned = IndexSet::complete(9);
        let p = IndexPartition::from_owned_set(&owned, &NoComm).unwrap();
        assert_eq!(p.n_ranks(), 1);
        assert_eq!(p.local_range(0), 0..9);
    }

    #[test]
    fn non_contiguous_owned_set_is_rejected() {
        let mut owned = IndexSet::new(9);
        owned.add_range(0..2).unwrap();
        owned.add_range(5..7).unwrap();
        assert!(IndexPartition::from_owned_set(&owned, &NoComm).is_err());
    }
}
