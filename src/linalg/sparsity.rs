//! Sparsity patterns for distributed matrices.
//!
//! Declaring structure is a separate phase from filling values:
//! [`DynamicSparsityPattern`] accumulates `(row, col)` pairs, including rows
//! owned by other ranks, and [`DynamicSparsityPattern::compress`] ships the
//! off-process declarations to their owners and freezes everything into an
//! immutable CSR [`SparsityPattern`]. Column lists are sorted and deduplicated,
//! so lookups are binary searches over contiguous slices.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireEntry;
use crate::amge_error::AmgeError;
use crate::debug_invariants::DebugInvariants;
use crate::linalg::partition::IndexPartition;

/// Mutable builder; rows are keyed by global index.
#[derive(Clone, Debug)]
pub struct DynamicSparsityPattern {
    rows: Arc<IndexPartition>,
    cols: Arc<IndexPartition>,
    rank: usize,
    owned: BTreeMap<u64, BTreeSet<u64>>,
    off_process: BTreeMap<u64, BTreeSet<u64>>,
}

impl DynamicSparsityPattern {
    pub fn new(rows: Arc<IndexPartition>, cols: Arc<IndexPartition>, rank: usize) -> Self {
        Self {
            rows,
            cols,
            rank,
            owned: BTreeMap::new(),
            off_process: BTreeMap::new(),
        }
    }

    /// Declare a nonzero at `(row, col)`; rows owned elsewhere are kept for
    /// the owner and communicated at [`compress`](Self::compress).
    pub fn add(&mut self, row: u64, col: u64) -> Result<(), AmgeError> {
        if col >= self.cols.size() {
            return Err(AmgeError::IndexOutOfRange {
                index: col,
                size: self.cols.size(),
            });
        }
        let owner = self.rows.owner_of(row)?;
        let target = if owner == self.rank {
            &mut self.owned
        } else {
            &mut self.off_process
        };
        target.entry(row).or_default().insert(col);
        Ok(())
    }

    /// Declare every `(row, c)` for `c` in `cols`.
    pub fn add_entries<I>(&mut self, row: u64, cols: I) -> Result<(), AmgeError>
    where
        I: IntoIterator<Item = u64>,
    {
        for col in cols {
            self.add(row, col)?;
        }
        Ok(())
    }

    /// Number of declarations made on this rank so far (owned + off-process).
    pub fn n_declared(&self) -> usize {
        self.owned
            .values()
            .chain(self.off_process.values())
            .map(BTreeSet::len)
            .sum()
    }

    /// Collective: exchange off-process declarations and freeze.
    pub fn compress<C>(mut self, comm: &C, tag: CommTag) -> Result<SparsityPattern, AmgeError>
    where
        C: Communicator + Sync,
    {
        let mut outgoing: HashMap<usize, Vec<WireEntry>> = HashMap::new();
        for (&row, cols) in &self.off_process {
            let owner = self.rows.owner_of(row)?;
            let bucket = outgoing.entry(owner).or_default();
            bucket.extend(cols.iter().map(|&col| WireEntry::new(row, col, 0.0)));
        }
        let incoming = exchange_records(&outgoing, comm, ExchangeTags::from_base(tag))?;
        for (nbr, records) in incoming {
            for rec in records {
                if self.rows.owner_of(rec.row())? != self.rank {
                    return Err(AmgeError::comm(
                        nbr,
                        format!("row {} declared here but owned elsewhere", rec.row()),
                    ));
                }
                self.owned.entry(rec.row()).or_default().insert(rec.col());
            }
        }

        let range = self.rows.local_range(self.rank);
        let n_local = (range.end - range.start) as usize;
        let mut row_offsets = Vec::with_capacity(n_local + 1);
        let mut col_indices = Vec::with_capacity(self.owned.values().map(BTreeSet::len).sum());
        row_offsets.push(0usize);
        for row in range.clone() {
            if let Some(cols) = self.owned.get(&row) {
                col_indices.extend(cols.iter().copied());
            }
            row_offsets.push(col_indices.len());
        }

        let pattern = SparsityPattern {
            rows: self.rows,
            cols: self.cols,
            rank: self.rank,
            row_offsets: row_offsets.into(),
            col_indices: col_indices.into(),
            off_process: Arc::new(self.off_process),
        };
        pattern.debug_assert_invariants();
        Ok(pattern)
    }
}

/// Immutable CSR structure of the locally owned rows, plus the set of
/// off-process coordinates this rank declared (and may therefore write).
#[derive(Clone, Debug)]
pub struct SparsityPattern {
    rows: Arc<IndexPartition>,
    cols: Arc<IndexPartition>,
    rank: usize,
    row_offsets: Arc<[usize]>,
    col_indices: Arc<[u64]>,
    off_process: Arc<BTreeMap<u64, BTreeSet<u64>>>,
}

impl SparsityPattern {
    pub fn row_partition(&self) -> &Arc<IndexPartition> {
        &self.rows
    }

    pub fn col_partition(&self) -> &Arc<IndexPartition> {
        &self.cols
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Global number of rows.
    pub fn n_rows(&self) -> u64 {
        self.rows.size()
    }

    /// Global number of columns.
    pub fn n_cols(&self) -> u64 {
        self.cols.size()
    }

    /// Half-open range of locally owned rows.
    pub fn local_range(&self) -> std::ops::Range<u64> {
        self.rows.local_range(self.rank)
    }

    /// Stored entries in locally owned rows.
    pub fn n_nonzero_elements(&self) -> usize {
        self.col_indices.len()
    }

    /// Sorted columns of an owned row (empty for rows owned elsewhere).
    pub fn row(&self, row: u64) -> &[u64] {
        match self.local_row(row) {
            Some(i) => &self.col_indices[self.row_offsets[i]..self.row_offsets[i + 1]],
            None => &[],
        }
    }

    /// Storage slot of `(row, col)` if the row is owned and the entry declared.
    pub fn position(&self, row: u64, col: u64) -> Option<usize> {
        let i = self.local_row(row)?;
        let start = self.row_offsets[i];
        let cols = &self.col_indices[start..self.row_offsets[i + 1]];
        cols.binary_search(&col).ok().map(|k| start + k)
    }

    /// Whether `(row, col)` was declared, on this rank or by this rank for
    /// another owner.
    pub fn exists(&self, row: u64, col: u64) -> bool {
        self.position(row, col).is_some()
            || self
                .off_process
                .get(&row)
                .is_some_and(|cols| cols.contains(&col))
    }

    /// Whether this rank declared `(row, col)` for a row it does not own.
    pub fn declared_off_process(&self, row: u64, col: u64) -> bool {
        self.off_process
            .get(&row)
            .is_some_and(|cols| cols.contains(&col))
    }

    /// Local row slot for a global row, if owned.
    pub(crate) fn local_row(&self, row: u64) -> Option<usize> {
        let range = self.local_range();
        range
            .contains(&row)
            .then(|| (row - range.start) as usize)
    }

    pub(crate) fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub(crate) fn col_indices(&self) -> &[u64] {
        &self.col_indices
    }

    /// Distinct columns referenced by the owned rows that are owned by
    /// other ranks (the "ghost" columns a mat-vec must import).
    pub fn ghost_columns(&self) -> Vec<u64> {
        let owned_cols = self.cols.local_range(self.rank);
        self.col_indices
            .iter()
            .copied()
            .filter(|c| !owned_cols.contains(c))
            .sorted_unstable()
            .dedup()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_pattern_is_sorted_and_deduplicated() {
        let rows = Arc::new(IndexPartition::from_sizes(&[3]));
        let cols = Arc::new(IndexPartition::from_sizes(&[5]));
        let mut dsp = DynamicSparsityPattern::new(rows, cols, 0);
        dsp.add_entries(1, [4, 0, 4, 2]).unwrap();
        dsp.add(2, 3).unwrap();
        let sp = dsp.compress(&NoComm, CommTag::new(0x20)).unwrap();
        assert_eq!(sp.row(1), &[0, 2, 4]);
        assert_eq!(sp.row(0), &[] as &[u64]);
        assert_eq!(sp.n_nonzero_elements(), 4);
        assert_eq!(sp.position(2, 3), Some(3));
        assert!(!sp.exists(0, 0));
    }

    #[test]
    fn column_out_of_range_is_rejected() {
        let rows = Arc::new(IndexPartition::from_sizes(&[1]));
        let cols = Arc::new(IndexPartition::from_sizes(&[1]));
        let mut dsp = DynamicSparsityPattern::new(rows, cols, 0);
        assert!(dsp.add(0, 1).is_err());
    }

    #[test]
    fn off_process_declarations_reach_owner() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let rows = Arc::new(IndexPartition::from_sizes(&[2, 2]));
                    let cols = Arc::new(IndexPartition::from_sizes(&[2, 2]));
                    let me = comm.rank();
                    let mut dsp = DynamicSparsityPattern::new(rows, cols, me);
                    // each rank declares a row owned by the other rank
                    let foreign_row = if me == 0 { 3 } else { 0 };
                    dsp.add(foreign_row, me as u64).unwrap();
                    let sp = dsp.compress(&comm, CommTag::new(0x30)).unwrap();
                    assert!(sp.declared_off_process(foreign_row, me as u64));
                    (me, sp.row(if me == 0 { 0 } else { 3 }).to_vec())
                })
            })
            .collect();
        for h in handles {
            let (me, cols) = h.join().unwrap();
            let other = 1 - me as u64;
            assert_eq!(cols, vec![other]);
        }
    }
}
