use crate::amge_error::AmgeError;
use crate::linalg::index_set::IndexSet;
use crate::linalg::partition::IndexPartition;
use crate::linalg::sparse_matrix::DistributedSparseMatrix;
use crate::linalg::sparsity::SparsityPattern;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), AmgeError>;
}

/// Helper macro to run a fallible check and panic on error when invariant
/// checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

impl DebugInvariants for IndexSet {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "IndexSet");
    }

    fn validate_invariants(&self) -> Result<(), AmgeError> {
        let mut prev_end = None;
        for r in self.ranges() {
            if r.is_empty() || r.end > self.size() {
                return Err(AmgeError::IndexOutOfRange {
                    index: r.end,
                    size: self.size(),
                });
            }
            if prev_end.is_some_and(|e| r.start <= e) {
                return Err(AmgeError::InvalidMesh(format!(
                    "index set ranges touch or overlap at {}",
                    r.start
                )));
            }
            prev_end = Some(r.end);
        }
        Ok(())
    }
}

impl DebugInvariants for IndexPartition {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "IndexPartition");
    }

    fn validate_invariants(&self) -> Result<(), AmgeError> {
        let mut prev = 0;
        for r in 0..self.n_ranks() {
            let range = self.local_range(r);
            if range.start != prev || range.end < range.start {
                return Err(AmgeError::InvalidMesh(format!(
                    "rank {r} range {range:?} does not continue at {prev}"
                )));
            }
            prev = range.end;
        }
        Ok(())
    }
}

impl DebugInvariants for SparsityPattern {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SparsityPattern");
    }

    fn validate_invariants(&self) -> Result<(), AmgeError> {
        let offsets = self.row_offsets();
        let n_local = self.local_range().end - self.local_range().start;
        if offsets.len() as u64 != n_local + 1 {
            return Err(AmgeError::DimensionMismatch {
                context: "row offsets",
                expected: n_local as usize + 1,
                got: offsets.len(),
            });
        }
        for row in self.local_range() {
            let cols = self.row(row);
            if let Some(w) = cols.windows(2).find(|w| w[0] >= w[1]) {
                return Err(AmgeError::InvalidMesh(format!(
                    "row {row} columns not strictly increasing at {}",
                    w[1]
                )));
            }
            if let Some(&c) = cols.last().filter(|&&c| c >= self.n_cols()) {
                return Err(AmgeError::IndexOutOfRange {
                    index: c,
                    size: self.n_cols(),
                });
            }
        }
        Ok(())
    }
}

impl DebugInvariants for DistributedSparseMatrix {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DistributedSparseMatrix");
    }

    fn validate_invariants(&self) -> Result<(), AmgeError> {
        self.sparsity_pattern().validate_invariants()?;
        if self.local_nnz() != self.sparsity_pattern().n_nonzero_elements() {
            return Err(AmgeError::DimensionMismatch {
                context: "stored values",
                expected: self.sparsity_pattern().n_nonzero_elements(),
                got: self.local_nnz(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_from_sizes_are_valid() {
        let p = IndexPartition::from_sizes(&[3, 0, 4]);
        assert!(p.validate_invariants().is_ok());
        p.debug_assert_invariants();
    }

    #[test]
    fn index_sets_built_by_insertion_are_valid() {
        let mut s = IndexSet::new(10);
        s.add_range(4..6).unwrap();
        s.add_index(1).unwrap();
        s.add_range(5..9).unwrap();
        assert!(s.validate_invariants().is_ok());
    }
}
