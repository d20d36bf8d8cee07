mod util;
use util::*;

use std::collections::BTreeSet;
use std::sync::Arc;

use sieve_amge::algs::communicator::{CommTag, Communicator, RayonComm};
use sieve_amge::amge_error::AmgeError;
use sieve_amge::linalg::{
    CompressMode, DistributedSparseMatrix, DistributedVector, DynamicSparsityPattern,
    IndexPartition,
};

const N: u64 = 6;

/// 1D Laplacian stencil `[-1, 2, -1]` on N rows split evenly over the ranks.
fn tridiagonal(comm: &RayonComm) -> DistributedSparseMatrix {
    let part = Arc::new(IndexPartition::from_local_size(N / comm.size() as u64, comm));
    let range = part.local_range(comm.rank());
    let mut dsp = DynamicSparsityPattern::new(part.clone(), part, comm.rank());
    for row in range.clone() {
        let lo = row.saturating_sub(1);
        let hi = (row + 1).min(N - 1);
        dsp.add_entries(row, lo..=hi).unwrap();
    }
    let mut a = DistributedSparseMatrix::new(dsp.compress(comm, CommTag::new(0x7100)).unwrap());
    for row in range {
        let cols = a.sparsity_pattern().row(row).to_vec();
        for col in cols {
            a.set(row, col, if col == row { 2.0 } else { -1.0 }).unwrap();
        }
    }
    a.compress(CompressMode::Insert, comm).unwrap();
    a
}

fn ramp(a: &DistributedSparseMatrix, comm: &RayonComm) -> DistributedVector {
    let mut x = DistributedVector::new(a.col_partition().clone(), comm.rank());
    let range = x.local_range();
    for (k, v) in x.local_values_mut().iter_mut().enumerate() {
        *v = (range.start + k as u64) as f64;
    }
    x
}

#[test]
fn vmult_imports_ghost_columns() {
    let results = on_ranks(2, |comm| {
        let a = tridiagonal(&comm);
        let x = ramp(&a, &comm);
        let mut y = DistributedVector::new(a.row_partition().clone(), comm.rank());
        a.vmult(&mut y, &x, &comm).unwrap();
        y.local_values().to_vec()
    });
    assert_eq!(results[0], vec![-1.0, 0.0, 0.0]);
    assert_eq!(results[1], vec![0.0, 0.0, 6.0]);
}

#[test]
fn tvmult_of_a_symmetric_matrix_matches_vmult() {
    let results = on_ranks(2, |comm| {
        let a = tridiagonal(&comm);
        let x = ramp(&a, &comm);
        let mut y = DistributedVector::new(a.row_partition().clone(), comm.rank());
        let mut z = DistributedVector::new(a.col_partition().clone(), comm.rank());
        a.vmult(&mut y, &x, &comm).unwrap();
        a.tvmult(&mut z, &x, &comm).unwrap();
        (y.local_values().to_vec(), z.local_values().to_vec())
    });
    for (y, z) in results {
        assert_eq!(y, z);
    }
}

#[test]
fn import_rows_fetches_remote_rows() {
    let results = on_ranks(2, |comm| {
        let a = tridiagonal(&comm);
        let wanted: BTreeSet<u64> = [2, 3].into_iter().collect();
        a.import_rows(&wanted, &comm).unwrap()
    });
    for rows in results {
        assert_eq!(rows[&2], vec![(1, -1.0), (2, 2.0), (3, -1.0)]);
        assert_eq!(rows[&3], vec![(2, -1.0), (3, 2.0), (4, -1.0)]);
    }
}

#[test]
fn off_process_adds_reach_the_owner() {
    let results = on_ranks(2, |comm| {
        let part = Arc::new(IndexPartition::from_local_size(2, &comm));
        let mut dsp = DynamicSparsityPattern::new(part.clone(), part, comm.rank());
        // both ranks write into row 2, owned by rank 1
        dsp.add(2, 2).unwrap();
        dsp.add(2, 0).unwrap();
        let mut a = DistributedSparseMatrix::new(dsp.compress(&comm, CommTag::new(0x7200)).unwrap());
        a.add(2, 2, 1.0 + comm.rank() as f64).unwrap();
        a.add(2, 0, 0.5).unwrap();
        a.compress(CompressMode::Add, &comm).unwrap();
        let global_nnz = a.n_nonzero_elements(&comm);
        (a.local_nnz(), global_nnz, a.el(2, 2).ok(), a.el(2, 0).ok())
    });
    assert_eq!(results[0], (0, 2, None, None));
    assert_eq!(results[1], (2, 2, Some(3.0), Some(1.0)));
}

#[test]
fn writes_outside_the_pattern_are_rejected() {
    let errors = on_ranks(2, |comm| {
        let part = Arc::new(IndexPartition::from_local_size(2, &comm));
        let mut dsp = DynamicSparsityPattern::new(part.clone(), part, comm.rank());
        let me = 2 * comm.rank() as u64;
        dsp.add(me, me).unwrap();
        let mut a = DistributedSparseMatrix::new(dsp.compress(&comm, CommTag::new(0x7300)).unwrap());
        // undeclared: local and remote
        let local = a.set(me, me + 1, 1.0).unwrap_err();
        let remote = a.set((me + 2) % 4, 0, 1.0).unwrap_err();
        (local, remote)
    });
    for (local, remote) in errors {
        assert!(matches!(local, AmgeError::StructuralViolation { .. }));
        assert!(matches!(remote, AmgeError::StructuralViolation { .. }));
    }
}

#[test]
fn products_require_compress() {
    let results = on_ranks(2, |comm| {
        let part = Arc::new(IndexPartition::from_local_size(1, &comm));
        let dsp = DynamicSparsityPattern::new(part.clone(), part.clone(), comm.rank());
        let a = DistributedSparseMatrix::new(dsp.compress(&comm, CommTag::new(0x7400)).unwrap());
        let x = DistributedVector::new(part.clone(), comm.rank());
        let mut y = DistributedVector::new(part, comm.rank());
        a.vmult(&mut y, &x, &comm)
    });
    for r in results {
        assert!(matches!(r, Err(AmgeError::MatrixState(_))));
    }
}
