//! Distributed vector with a contiguous owned range.
//!
//! Writes to indices owned by other ranks are stashed and shipped to their
//! owners at [`DistributedVector::compress`], mirroring the two-phase
//! behavior of [`DistributedSparseMatrix`](super::sparse_matrix::DistributedSparseMatrix).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::algs::collective::{allreduce_max_f64, allreduce_sum_f64};
use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::{WireIndex, WireIndexValue};
use crate::amge_error::AmgeError;
use crate::linalg::index_set::IndexSet;
use crate::linalg::partition::IndexPartition;

/// How pending off-process contributions are merged by their owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompressMode {
    /// Overwrite; a coordinate must not receive two different values.
    Insert,
    /// Accumulate.
    Add,
}

const VECTOR_COMPRESS_TAG: CommTag = CommTag::new(0x5100);
const VECTOR_IMPORT_TAG: CommTag = CommTag::new(0x5110);

#[derive(Clone, Debug)]
pub struct DistributedVector {
    partition: Arc<IndexPartition>,
    rank: usize,
    values: Vec<f64>,
    stash: BTreeMap<u64, f64>,
    pending: Option<CompressMode>,
}

impl DistributedVector {
    /// Zero vector with the given layout.
    pub fn new(partition: Arc<IndexPartition>, rank: usize) -> Self {
        let n_local = partition.local_size(rank);
        Self {
            partition,
            rank,
            values: vec![0.0; n_local],
            stash: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn partition(&self) -> &Arc<IndexPartition> {
        &self.partition
    }

    /// Global length.
    pub fn size(&self) -> u64 {
        self.partition.size()
    }

    pub fn local_range(&self) -> std::ops::Range<u64> {
        self.partition.local_range(self.rank)
    }

    pub fn locally_owned_elements(&self) -> IndexSet {
        self.partition.owned_set(self.rank)
    }

    /// Owned values in ascending global order.
    pub fn local_values(&self) -> &[f64] {
        &self.values
    }

    pub fn local_values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Set every owned entry to `value` and drop pending writes.
    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
        self.stash.clear();
        self.pending = None;
    }

    fn local_slot(&self, index: u64) -> Option<usize> {
        let r = self.local_range();
        r.contains(&index).then(|| (index - r.start) as usize)
    }

    fn begin(&mut self, mode: CompressMode) -> Result<(), AmgeError> {
        match self.pending {
            Some(m) if m != mode => Err(AmgeError::MatrixState(
                "cannot mix set and add before compress",
            )),
            _ => {
                self.pending = Some(mode);
                Ok(())
            }
        }
    }

    /// Write `value` at a global index; off-process writes wait for `compress`.
    pub fn set(&mut self, index: u64, value: f64) -> Result<(), AmgeError> {
        if index >= self.size() {
            return Err(AmgeError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        self.begin(CompressMode::Insert)?;
        match self.local_slot(index) {
            Some(i) => self.values[i] = value,
            None => {
                self.stash.insert(index, value);
            }
        }
        Ok(())
    }

    /// Accumulate `value` at a global index.
    pub fn add(&mut self, index: u64, value: f64) -> Result<(), AmgeError> {
        if index >= self.size() {
            return Err(AmgeError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        self.begin(CompressMode::Add)?;
        match self.local_slot(index) {
            Some(i) => self.values[i] += value,
            None => *self.stash.entry(index).or_insert(0.0) += value,
        }
        Ok(())
    }

    /// Read an owned entry.
    pub fn get(&self, index: u64) -> Result<f64, AmgeError> {
        self.local_slot(index)
            .map(|i| self.values[i])
            .ok_or(AmgeError::IndexNotOwned {
                index,
                rank: self.rank,
            })
    }

    /// Collective: deliver stashed writes to their owners.
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
        let mut outgoing: HashMap<usize, Vec<WireIndexValue>> = HashMap::new();
        for (&index, &value) in &self.stash {
            let owner = self.partition.owner_of(index)?;
            outgoing
                .entry(owner)
                .or_default()
                .push(WireIndexValue::new(index, value));
        }
        self.stash.clear();
        self.pending = None;

        let incoming =
            exchange_records(&outgoing, comm, ExchangeTags::from_base(VECTOR_COMPRESS_TAG))?;
        if let Some(err) = mode_error {
            return Err(err);
        }
        for (nbr, records) in incoming {
            for rec in records {
                let slot = self.local_slot(rec.index()).ok_or_else(|| {
                    AmgeError::comm(nbr, format!("index {} is not owned here", rec.index()))
                })?;
                match mode {
                    CompressMode::Insert => self.values[slot] = rec.value(),
                    CompressMode::Add => self.values[slot] += rec.value(),
                }
            }
        }
        Ok(())
    }

    /// Collective: fetch the values of `indices` from their owners. Owned
    /// indices are answered locally.
    pub fn import_values<C>(
        &self,
        indices: &[u64],
        comm: &C,
    ) -> Result<HashMap<u64, f64>, AmgeError>
    where
        C: Communicator + Sync,
    {
        let mut result = HashMap::with_capacity(indices.len());
        let mut requests: HashMap<usize, Vec<WireIndex>> = HashMap::new();
        let wanted: BTreeSet<u64> = indices.iter().copied().collect();
        for index in wanted {
            match self.local_slot(index) {
                Some(i) => {
                    result.insert(index, self.values[i]);
                }
                None => {
                    let owner = self.partition.owner_of(index)?;
                    requests.entry(owner).or_default().push(WireIndex::of(index));
                }
            }
        }

        let tags = ExchangeTags::from_base(VECTOR_IMPORT_TAG);
        let asked = exchange_records(&requests, comm, tags)?;
        let mut replies: HashMap<usize, Vec<WireIndexValue>> = HashMap::new();
        let mut misrouted = None;
        for (nbr, wanted) in asked {
            let mut out = Vec::with_capacity(wanted.len());
            for w in wanted {
                match self.local_slot(w.get()) {
                    Some(slot) => out.push(WireIndexValue::new(w.get(), self.values[slot])),
                    None => {
                        misrouted.get_or_insert_with(|| {
                            AmgeError::comm(
                                nbr,
                                format!("index {} requested from non-owner", w.get()),
                            )
                        });
                    }
                }
            }
            replies.insert(nbr, out);
        }
        // replies go out even when a request was misrouted
        let answered = exchange_records(
            &replies,
            comm,
            ExchangeTags::from_base(VECTOR_IMPORT_TAG.offset(2)),
        )?;
        if let Some(err) = misrouted {
            return Err(err);
        }
        for records in answered.into_values() {
            for rec in records {
                result.insert(rec.index(), rec.value());
            }
        }
        Ok(result)
    }

    /// Collective: sum of absolute values.
    pub fn l1_norm<C: Communicator>(&self, comm: &C) -> f64 {
        let local: f64 = self.values.iter().map(|v| v.abs()).sum();
        allreduce_sum_f64(comm, local)
    }

    /// Collective: Euclidean norm.
    pub fn l2_norm<C: Communicator>(&self, comm: &C) -> f64 {
        let local: f64 = self.values.iter().map(|v| v * v).sum();
        allreduce_sum_f64(comm, local).sqrt()
    }

    /// Collective: maximum absolute value.
    pub fn linfty_norm<C: Communicator>(&self, comm: &C) -> f64 {
        let local = self.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        allreduce_max_f64(comm, local)
    }
}
