//! Row-distributed CSR matrix with an explicit build → compress lifecycle.
//!
//! A matrix is created from a frozen [`SparsityPattern`]; values can then be
//! `set` or `add`ed at declared coordinates only. Writes to rows owned by
//! another rank are stashed and shipped at [`DistributedSparseMatrix::compress`],
//! which also marks the matrix ready for products. Any later write reopens the
//! build phase until the next compress.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::MulAssign;
use std::sync::Arc;

use log::debug;

use crate::algs::collective::{allreduce_sum_f64, allreduce_sum_u64};
use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::{WireEntry, WireIndex, WireIndexValue};
use crate::amge_error::AmgeError;
use crate::debug_invariants::DebugInvariants;
use crate::linalg::index_set::IndexSet;
use crate::linalg::partition::IndexPartition;
use crate::linalg::sparsity::SparsityPattern;
pub use crate::linalg::vector::CompressMode;
use crate::linalg::vector::DistributedVector;

const MATRIX_COMPRESS_TAG: CommTag = CommTag::new(0x6100);
const ROW_IMPORT_TAG: CommTag = CommTag::new(0x6110);
const TVMULT_TAG: CommTag = CommTag::new(0x6120);

/// Rows fetched from their owners: global row → sorted `(col, value)` pairs.
pub type ImportedRows = BTreeMap<u64, Vec<(u64, f64)>>;

#[derive(Clone, Debug)]
pub struct DistributedSparseMatrix {
    pattern: SparsityPattern,
    values: Vec<f64>,
    written: Vec<bool>,
    stash: BTreeMap<(u64, u64), f64>,
    pending: Option<CompressMode>,
    compressed: bool,
}

impl DistributedSparseMatrix {
    /// Allocate zero values for every declared entry.
    pub fn new(pattern: SparsityPattern) -> Self {
        let nnz = pattern.n_nonzero_elements();
        Self {
            pattern,
            values: vec![0.0; nnz],
            written: vec![false; nnz],
            stash: BTreeMap::new(),
            pending: None,
            compressed: false,
        }
    }

    /// Drop every value and pending write and adopt `pattern`.
    pub fn reinit(&mut self, pattern: SparsityPattern) {
        *self = Self::new(pattern);
    }

    pub fn sparsity_pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    /// Global number of rows (range dimension).
    pub fn m(&self) -> u64 {
        self.pattern.n_rows()
    }

    /// Global number of columns (domain dimension).
    pub fn n(&self) -> u64 {
        self.pattern.n_cols()
    }

    pub fn local_range(&self) -> std::ops::Range<u64> {
        self.pattern.local_range()
    }

    /// Rows owned by this rank.
    pub fn locally_owned_range_indices(&self) -> IndexSet {
        self.pattern.row_partition().owned_set(self.pattern.rank())
    }

    /// Columns whose vector entries this rank owns.
    pub fn locally_owned_domain_indices(&self) -> IndexSet {
        self.pattern.col_partition().owned_set(self.pattern.rank())
    }

    pub fn row_partition(&self) -> &Arc<IndexPartition> {
        self.pattern.row_partition()
    }

    pub fn col_partition(&self) -> &Arc<IndexPartition> {
        self.pattern.col_partition()
    }

    /// True once `compress` has run and nothing has been written since.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Stored entries in locally owned rows.
    pub fn local_nnz(&self) -> usize {
        self.values.len()
    }

    /// Collective: stored entries over all ranks.
    pub fn n_nonzero_elements<C: Communicator>(&self, comm: &C) -> u64 {
        allreduce_sum_u64(comm, self.local_nnz() as u64)
    }

    fn begin(&mut self, mode: CompressMode) -> Result<(), AmgeError> {
        match self.pending {
            Some(m) if m != mode => Err(AmgeError::MatrixState(
                "cannot mix set and add before compress",
            )),
            _ => {
                self.pending = Some(mode);
                self.compressed = false;
                Ok(())
            }
        }
    }

    fn store_insert(&mut self, slot: usize, row: u64, col: u64, value: f64) -> Result<(), AmgeError> {
        if self.written[slot] && self.values[slot].to_bits() != value.to_bits() {
            return Err(AmgeError::ConflictingInsert {
                row,
                col,
                first: self.values[slot],
                second: value,
            });
        }
        self.values[slot] = value;
        self.written[slot] = true;
        Ok(())
    }

    /// Write `value` at `(row, col)`. The coordinate must be declared in the
    /// pattern; writing it twice with different values is a conflict.
    pub fn set(&mut self, row: u64, col: u64, value: f64) -> Result<(), AmgeError> {
        self.begin(CompressMode::Insert)?;
        if let Some(slot) = self.pattern.position(row, col) {
            return self.store_insert(slot, row, col, value);
        }
        if !self.pattern.declared_off_process(row, col) {
            return Err(AmgeError::StructuralViolation { row, col });
        }
        match self.stash.get(&(row, col)) {
            Some(&first) if first.to_bits() != value.to_bits() => {
                Err(AmgeError::ConflictingInsert {
                    row,
                    col,
                    first,
                    second: value,
                })
            }
            _ => {
                self.stash.insert((row, col), value);
                Ok(())
            }
        }
    }

    /// Accumulate `value` at `(row, col)`.
    pub fn add(&mut self, row: u64, col: u64, value: f64) -> Result<(), AmgeError> {
        self.begin(CompressMode::Add)?;
        if let Some(slot) = self.pattern.position(row, col) {
            self.values[slot] += value;
            self.written[slot] = true;
            return Ok(());
        }
        if !self.pattern.declared_off_process(row, col) {
            return Err(AmgeError::StructuralViolation { row, col });
        }
        *self.stash.entry((row, col)).or_insert(0.0) += value;
        Ok(())
    }

    /// Collective: ship stashed entries to their owners, apply them with
    /// `mode`, and finalize the matrix for products. Every rank completes
    /// the exchange before an error is reported.
    pub fn compress<C>(&mut self, mode: CompressMode, comm: &C) -> Result<(), AmgeError>
    where
        C: Communicator + Sync,
    {
        let mode_error = match self.pending {
            Some(pending) if pending != mode => Some(AmgeError::MatrixState(
                "compress mode differs from the pending operation",
            )),
            _ => None,
        };

        let mut outgoing: HashMap<usize, Vec<WireEntry>> = HashMap::new();
        for (&(row, col), &value) in &self.stash {
            let owner = self.pattern.row_partition().owner_of(row)?;
            outgoing
                .entry(owner)
                .or_default()
                .push(WireEntry::new(row, col, value));
        }
        let n_sent = self.stash.len();
        self.stash.clear();
        self.pending = None;

        let incoming =
            exchange_records(&outgoing, comm, ExchangeTags::from_base(MATRIX_COMPRESS_TAG))?;
        if let Some(err) = mode_error {
            return Err(err);
        }

        let mut n_received = 0usize;
        for records in incoming.into_values() {
            for rec in records {
                n_received += 1;
                let (row, col, value) = (rec.row(), rec.col(), rec.value());
                let slot = self
                    .pattern
                    .position(row, col)
                    .ok_or(AmgeError::StructuralViolation { row, col })?;
                match mode {
                    CompressMode::Insert => self.store_insert(slot, row, col, value)?,
                    CompressMode::Add => {
                        self.values[slot] += value;
                        self.written[slot] = true;
                    }
                }
            }
        }
        debug!(
            "rank {}: compress({mode:?}) sent {n_sent} and applied {n_received} off-process entries",
            self.pattern.rank()
        );
        // conflicts are only checked within one set/compress round
        self.written.iter_mut().for_each(|w| *w = false);
        self.compressed = true;
        self.debug_assert_invariants();
        Ok(())
    }

    /// Stored value at `(row, col)` of an owned row, or zero if the entry is
    /// not part of the pattern.
    pub fn el(&self, row: u64, col: u64) -> Result<f64, AmgeError> {
        if self.pattern.local_row(row).is_none() {
            return Err(AmgeError::IndexNotOwned {
                index: row,
                rank: self.pattern.rank(),
            });
        }
        Ok(self
            .pattern
            .position(row, col)
            .map_or(0.0, |slot| self.values[slot]))
    }

    /// Stored value at `(row, col)`; errors if the entry does not exist.
    pub fn get(&self, row: u64, col: u64) -> Result<f64, AmgeError> {
        if self.pattern.local_row(row).is_none() {
            return Err(AmgeError::IndexNotOwned {
                index: row,
                rank: self.pattern.rank(),
            });
        }
        self.pattern
            .position(row, col)
            .map(|slot| self.values[slot])
            .ok_or(AmgeError::StructuralViolation { row, col })
    }

    /// `(col, value)` pairs of an owned row, sorted by column.
    pub fn row(&self, row: u64) -> impl Iterator<Item = (u64, f64)> + '_ {
        let (start, end) = match self.pattern.local_row(row) {
            Some(i) => (self.pattern.row_offsets()[i], self.pattern.row_offsets()[i + 1]),
            None => (0, 0),
        };
        self.pattern.col_indices()[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// Multiply every stored value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|v| *v *= factor);
    }

    fn ensure_compressed(&self) -> Result<(), AmgeError> {
        if self.compressed {
            Ok(())
        } else {
            Err(AmgeError::MatrixState("matrix must be compressed before use"))
        }
    }

    /// Collective: `dst = A * src`. Ghost entries of `src` are imported from
    /// their owners first.
    pub fn vmult<C>(
        &self,
        dst: &mut DistributedVector,
        src: &DistributedVector,
        comm: &C,
    ) -> Result<(), AmgeError>
    where
        C: Communicator + Sync,
    {
        self.ensure_compressed()?;
        if src.partition().as_ref() != self.col_partition().as_ref() {
            return Err(AmgeError::DimensionMismatch {
                context: "vmult source layout",
                expected: self.n() as usize,
                got: src.size() as usize,
            });
        }
        if dst.partition().as_ref() != self.row_partition().as_ref() {
            return Err(AmgeError::DimensionMismatch {
                context: "vmult destination layout",
                expected: self.m() as usize,
                got: dst.size() as usize,
            });
        }

        let ghosts = src.import_values(&self.pattern.ghost_columns(), comm)?;
        let col_range = src.local_range();
        let offsets = self.pattern.row_offsets();
        let cols = self.pattern.col_indices();
        let out = dst.local_values_mut();
        for (i, y) in out.iter_mut().enumerate() {
            let mut acc = 0.0;
            for k in offsets[i]..offsets[i + 1] {
                let c = cols[k];
                let x = if col_range.contains(&c) {
                    src.local_values()[(c - col_range.start) as usize]
                } else {
                    ghost_value(&ghosts, c, self.col_partition())?
                };
                acc += self.values[k] * x;
            }
            *y = acc;
        }
        Ok(())
    }

    /// Collective: `dst = Aᵀ * src`. Contributions to columns owned
    /// elsewhere are summed on their owners.
    pub fn tvmult<C>(
        &self,
        dst: &mut DistributedVector,
        src: &DistributedVector,
        comm: &C,
    ) -> Result<(), AmgeError>
    where
        C: Communicator + Sync,
    {
        self.ensure_compressed()?;
        if src.partition().as_ref() != self.row_partition().as_ref()
            || dst.partition().as_ref() != self.col_partition().as_ref()
        {
            return Err(AmgeError::DimensionMismatch {
                context: "tvmult layouts",
                expected: self.m() as usize,
                got: src.size() as usize,
            });
        }
        let col_range = dst.local_range();
        let mut local = vec![0.0; dst.local_values().len()];
        let mut remote: BTreeMap<u64, f64> = BTreeMap::new();
        let offsets = self.pattern.row_offsets();
        let cols = self.pattern.col_indices();
        for (i, &x) in src.local_values().iter().enumerate() {
            for k in offsets[i]..offsets[i + 1] {
                let c = cols[k];
                let contrib = self.values[k] * x;
                if col_range.contains(&c) {
                    local[(c - col_range.start) as usize] += contrib;
                } else {
                    *remote.entry(c).or_insert(0.0) += contrib;
                }
            }
        }
        let mut outgoing: HashMap<usize, Vec<WireIndexValue>> = HashMap::new();
        for (c, v) in remote {
            let owner = self.col_partition().owner_of(c)?;
            outgoing
                .entry(owner)
                .or_default()
                .push(WireIndexValue::new(c, v));
        }
        let incoming = exchange_records(&outgoing, comm, ExchangeTags::from_base(TVMULT_TAG))?;
        for (nbr, records) in incoming {
            for rec in records {
                if !col_range.contains(&rec.index()) {
                    return Err(AmgeError::comm(
                        nbr,
                        format!("column {} is not owned here", rec.index()),
                    ));
                }
                local[(rec.index() - col_range.start) as usize] += rec.value();
            }
        }
        dst.local_values_mut().copy_from_slice(&local);
        Ok(())
    }

    /// Collective: fetch complete rows owned by other ranks. Owned rows in
    /// `rows` are copied locally.
    pub fn import_rows<C>(&self, rows: &BTreeSet<u64>, comm: &C) -> Result<ImportedRows, AmgeError>
    where
        C: Communicator + Sync,
    {
        self.ensure_compressed()?;
        let mut result = ImportedRows::new();
        let mut requests: HashMap<usize, Vec<WireIndex>> = HashMap::new();
        for &row in rows {
            if self.pattern.local_row(row).is_some() {
                result.insert(row, self.row(row).collect());
            } else {
                let owner = self.row_partition().owner_of(row)?;
                requests.entry(owner).or_default().push(WireIndex::of(row));
            }
        }

        let asked = exchange_records(&requests, comm, ExchangeTags::from_base(ROW_IMPORT_TAG))?;
        let mut replies: HashMap<usize, Vec<WireEntry>> = HashMap::new();
        for (nbr, wanted) in asked {
            let out = replies.entry(nbr).or_default();
            for w in wanted {
                out.extend(self.row(w.get()).map(|(c, v)| WireEntry::new(w.get(), c, v)));
            }
        }
        let answered = exchange_records(
            &replies,
            comm,
            ExchangeTags::from_base(ROW_IMPORT_TAG.offset(2)),
        )?;
        for records in answered.into_values() {
            for rec in records {
                result.entry(rec.row()).or_default().push((rec.col(), rec.value()));
            }
        }
        // requested rows that turned out empty still get an entry
        for &row in rows {
            result.entry(row).or_default();
        }
        Ok(result)
    }

    /// Collective: Frobenius norm.
    pub fn frobenius_norm<C: Communicator>(&self, comm: &C) -> f64 {
        let local: f64 = self.values.iter().map(|v| v * v).sum();
        allreduce_sum_f64(comm, local).sqrt()
    }
}

impl MulAssign<f64> for DistributedSparseMatrix {
    fn mul_assign(&mut self, factor: f64) {
        self.scale(factor);
    }
}

/// Value of an imported ghost column. A column absent from `ghosts` means the
/// import lost it.
fn ghost_value(
    ghosts: &HashMap<u64, f64>,
    col: u64,
    col_partition: &IndexPartition,
) -> Result<f64, AmgeError> {
    match ghosts.get(&col) {
        Some(&v) => Ok(v),
        None => Err(AmgeError::comm(
            col_partition.owner_of(col)?,
            format!("ghost column {col} was not returned by its owner"),
        )),
    }
}
