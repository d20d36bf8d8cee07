//! Restriction operator: sparsity declaration, then value insertion.
//!
//! Coarse rows are numbered per rank: rank `r` owns the contiguous block of
//! rows generated by its agglomerates, offset by the coarse counts of the
//! lower ranks. Columns follow the row layout of the reference (fine)
//! matrix. For local coarse row `pos` of agglomerate `a`,
//!
//! ```text
//! R[first + pos, dof_indices_maps[a][j]] = diag_elements[a][j] * eigenvectors[pos][j]
//! ```

use std::sync::Arc;

use log::debug;

use crate::algs::collective::agree_on;
use crate::algs::communicator::{CommTag, Communicator};
use crate::amge_error::AmgeError;
use crate::linalg::partition::IndexPartition;
use crate::linalg::sparse_matrix::{CompressMode, DistributedSparseMatrix};
use crate::linalg::sparsity::{DynamicSparsityPattern, SparsityPattern};

const RESTRICTION_PATTERN_TAG: CommTag = CommTag::new(0x2100);

/// Shape checks that need no communication.
fn check_maps(
    dof_indices_maps: &[Vec<u64>],
    n_local_eigenvectors: &[usize],
    n_fine: u64,
) -> Result<(), AmgeError> {
    if dof_indices_maps.len() != n_local_eigenvectors.len() {
        return Err(AmgeError::DimensionMismatch {
            context: "n_local_eigenvectors",
            expected: dof_indices_maps.len(),
            got: n_local_eigenvectors.len(),
        });
    }
    for (row, map) in dof_indices_maps.iter().enumerate() {
        let mut sorted = map.clone();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(AmgeError::DuplicateIndex { row, index: w[0] });
        }
        if let Some(&index) = sorted.last().filter(|&&i| i >= n_fine) {
            return Err(AmgeError::IndexOutOfRange {
                index,
                size: n_fine,
            });
        }
    }
    Ok(())
}

fn check_values(
    eigenvectors: &[Vec<f64>],
    diag_elements: &[Vec<f64>],
    dof_indices_maps: &[Vec<u64>],
    n_local_eigenvectors: &[usize],
) -> Result<(), AmgeError> {
    let n_coarse: usize = n_local_eigenvectors.iter().sum();
    if eigenvectors.len() != n_coarse {
        return Err(AmgeError::DimensionMismatch {
            context: "eigenvectors (one per coarse row)",
            expected: n_coarse,
            got: eigenvectors.len(),
        });
    }
    if diag_elements.len() != dof_indices_maps.len() {
        return Err(AmgeError::DimensionMismatch {
            context: "diag_elements",
            expected: dof_indices_maps.len(),
            got: diag_elements.len(),
        });
    }
    let mut pos = 0;
    for (a, map) in dof_indices_maps.iter().enumerate() {
        if diag_elements[a].len() != map.len() {
            return Err(AmgeError::DimensionMismatch {
                context: "diag_elements row",
                expected: map.len(),
                got: diag_elements[a].len(),
            });
        }
        for _ in 0..n_local_eigenvectors[a] {
            if eigenvectors[pos].len() != map.len() {
                return Err(AmgeError::DimensionMismatch {
                    context: "eigenvector length",
                    expected: map.len(),
                    got: eigenvectors[pos].len(),
                });
            }
            pos += 1;
        }
    }
    Ok(())
}

/// Collective: declare every nonzero of the restriction operator.
pub fn compute_restriction_sparsity_pattern<C>(
    dof_indices_maps: &[Vec<u64>],
    n_local_eigenvectors: &[usize],
    reference_matrix: &DistributedSparseMatrix,
    comm: &C,
) -> Result<SparsityPattern, AmgeError>
where
    C: Communicator + Sync,
{
    agree_on(
        comm,
        check_maps(dof_indices_maps, n_local_eigenvectors, reference_matrix.m()),
        "restriction pattern checks",
    )?;
    let n_coarse_local: usize = n_local_eigenvectors.iter().sum();
    let rows = Arc::new(IndexPartition::from_local_size(n_coarse_local as u64, comm));
    let cols = reference_matrix.row_partition().clone();
    let first = rows.local_range(comm.rank()).start;

    let mut dsp = DynamicSparsityPattern::new(rows, cols, comm.rank());
    let mut pos = first;
    for (map, &n_eig) in dof_indices_maps.iter().zip(n_local_eigenvectors) {
        for _ in 0..n_eig {
            // rows are owned and columns were range checked above
            dsp.add_entries(pos, map.iter().copied())?;
            pos += 1;
        }
    }
    let pattern = dsp.compress(comm, RESTRICTION_PATTERN_TAG)?;
    debug!(
        "rank {}: restriction pattern rows {:?}, {} local nonzeros",
        comm.rank(),
        pattern.local_range(),
        pattern.n_nonzero_elements()
    );
    Ok(pattern)
}

/// `set` every coefficient of the locally owned coarse rows.
fn insert_values(
    restriction: &mut DistributedSparseMatrix,
    eigenvectors: &[Vec<f64>],
    diag_elements: &[Vec<f64>],
    dof_indices_maps: &[Vec<u64>],
    n_local_eigenvectors: &[usize],
) -> Result<(), AmgeError> {
    let first = restriction.local_range().start;
    let mut pos = 0usize;
    for (a, map) in dof_indices_maps.iter().enumerate() {
        for _ in 0..n_local_eigenvectors[a] {
            let row = first + pos as u64;
            for (j, &col) in map.iter().enumerate() {
                restriction.set(row, col, diag_elements[a][j] * eigenvectors[pos][j])?;
            }
            pos += 1;
        }
    }
    Ok(())
}

/// Collective: build and finalize the restriction operator.
pub fn compute_restriction_sparse_matrix<C>(
    eigenvectors: &[Vec<f64>],
    diag_elements: &[Vec<f64>],
    dof_indices_maps: &[Vec<u64>],
    n_local_eigenvectors: &[usize],
    reference_matrix: &DistributedSparseMatrix,
    comm: &C,
) -> Result<DistributedSparseMatrix, AmgeError>
where
    C: Communicator + Sync,
{
    agree_on(
        comm,
        check_values(
            eigenvectors,
            diag_elements,
            dof_indices_maps,
            n_local_eigenvectors,
        ),
        "restriction input checks",
    )?;
    let pattern = compute_restriction_sparsity_pattern(
        dof_indices_maps,
        n_local_eigenvectors,
        reference_matrix,
        comm,
    )?;
    let mut restriction = DistributedSparseMatrix::new(pattern);

    let inserted = insert_values(
        &mut restriction,
        eigenvectors,
        diag_elements,
        dof_indices_maps,
        n_local_eigenvectors,
    );
    agree_on(comm, inserted, "restriction insertion")?;
    let finalized = restriction.compress(CompressMode::Insert, comm);
    agree_on(comm, finalized, "restriction compress")?;
    debug!(
        "rank {}: restriction finalized, {} local entries",
        comm.rank(),
        restriction.local_nnz()
    );
    Ok(restriction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn reference(n: u64) -> DistributedSparseMatrix {
        let part = Arc::new(IndexPartition::from_sizes(&[n]));
        let mut dsp = DynamicSparsityPattern::new(part.clone(), part, 0);
        for i in 0..n {
            dsp.add(i, i).unwrap();
        }
        let mut m = DistributedSparseMatrix::new(dsp.compress(&NoComm, CommTag::new(9)).unwrap());
        m.compress(CompressMode::Insert, &NoComm).unwrap();
        m
    }

    #[test]
    fn two_agglomerates_sharing_one_dof() {
        let a = reference(3);
        let maps = vec![vec![0, 1], vec![1, 2]];
        let diag = vec![vec![1.0, 0.5], vec![0.5, 1.0]];
        let eig = vec![vec![2.0, 4.0], vec![1.0, 3.0], vec![6.0, 8.0]];
        let r = compute_restriction_sparse_matrix(&eig, &diag, &maps, &[1, 2], &a, &NoComm)
            .unwrap();
        assert_eq!((r.m(), r.n()), (3, 3));
        assert_eq!(r.get(0, 1).unwrap(), 2.0);
        assert_eq!(r.get(1, 1).unwrap(), 0.5);
        assert_eq!(r.get(2, 2).unwrap(), 8.0);
        assert_eq!(r.el(0, 2).unwrap(), 0.0);
        assert!(r.is_compressed());
    }

    #[test]
    fn duplicate_claim_in_a_map_is_rejected() {
        let a = reference(3);
        let err = compute_restriction_sparse_matrix(
            &[vec![1.0, 1.0]],
            &[vec![1.0, 1.0]],
            &[vec![2, 2]],
            &[1],
            &a,
            &NoComm,
        )
        .unwrap_err();
        assert!(matches!(err, AmgeError::DuplicateIndex { row: 0, index: 2 }));
    }

    #[test]
    fn mismatched_eigenvector_count_is_rejected() {
        let a = reference(2);
        let err = compute_restriction_sparse_matrix(
            &[vec![1.0]],
            &[vec![1.0]],
            &[vec![0]],
            &[2],
            &a,
            &NoComm,
        )
        .unwrap_err();
        assert!(matches!(err, AmgeError::DimensionMismatch { .. }));
    }

    #[test]
    fn column_outside_the_fine_space_is_rejected() {
        let a = reference(2);
        let err = compute_restriction_sparsity_pattern(&[vec![0, 5]], &[1], &a, &NoComm)
            .unwrap_err();
        assert!(matches!(err, AmgeError::IndexOutOfRange { index: 5, size: 2 }));
    }
}
