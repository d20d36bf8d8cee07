mod util;
use util::*;

use std::sync::Arc;

use nalgebra::DMatrix;
use sieve_amge::algs::communicator::{CommTag, Communicator, NoComm};
use sieve_amge::amge::{AgglomerateDim, AmgeHost, Eigenpairs, LocalEigensolver, NonConvergence};
use sieve_amge::amge_error::AmgeError;
use sieve_amge::config::AmgeConfig;
use sieve_amge::discretization::{
    EvaluatorKind, LaplaceEvaluator, MassEvaluator, MatrixEvaluator, MeshEvaluator,
};
use sieve_amge::linalg::{
    CompressMode, DistributedSparseMatrix, DynamicSparsityPattern, IndexPartition,
};

/// Fails every solve when `fail` is set, otherwise returns the first unit vectors.
struct Refusing {
    fail: bool,
}

impl LocalEigensolver for Refusing {
    fn solve(
        &self,
        matrix: &DMatrix<f64>,
        k: usize,
        tolerance: f64,
    ) -> Result<Eigenpairs, NonConvergence> {
        if self.fail {
            return Err(NonConvergence {
                requested: k,
                tolerance,
            });
        }
        let n = matrix.nrows();
        Ok(Eigenpairs {
            eigenvalues: vec![1.0; k],
            eigenvectors: (0..k)
                .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
                .collect(),
        })
    }
}

/// Returns `value` for every entry of every requested vector.
struct Constant {
    value: f64,
}

impl LocalEigensolver for Constant {
    fn solve(
        &self,
        matrix: &DMatrix<f64>,
        k: usize,
        _tolerance: f64,
    ) -> Result<Eigenpairs, NonConvergence> {
        Ok(Eigenpairs {
            eigenvalues: vec![0.0; k],
            eigenvectors: vec![vec![self.value; matrix.nrows()]; k],
        })
    }
}

#[test]
fn laplace_restrictor_shape_in_2d() {
    let dof_handler = unit_cube(2, 3, 0, 1);
    let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &NoComm).unwrap();
    let host = AmgeHost::new(&NoComm, &dof_handler);
    let r = host
        .setup_restrictor(&AgglomerateDim::new(2, 2, 1), 2, 1e-14, &LaplaceEvaluator, &operator)
        .unwrap();

    assert_eq!(r.m(), 16 * 2);
    assert_eq!(r.n(), 81);
    assert!(r.is_compressed());
    for row in r.local_range() {
        assert_eq!(r.row(row).count(), 9);
    }
    // the lowest mode of an agglomerate block is strictly positive
    for row in r.local_range().step_by(2) {
        assert!(r.row(row).all(|(_, v)| v > 0.0), "row {row}");
    }
}

#[test]
fn mass_restrictor_in_3d() {
    let config = AmgeConfig::from_pairs([
        ("agglomeration: nx", "2"),
        ("agglomeration: ny", "2"),
        ("agglomeration: nz", "2"),
        ("evaluator", "mass"),
    ])
    .unwrap();
    let dof_handler = unit_cube(3, 2, 0, 1);
    let (_, operator) = config.evaluator.evaluate(&dof_handler, &NoComm).unwrap();
    let host = AmgeHost::from_config(&NoComm, &dof_handler, &config);
    let r = host
        .setup_restrictor_from_config(&config, &MassEvaluator, &operator)
        .unwrap();

    assert_eq!(r.m(), 8);
    assert_eq!(r.n(), 125);
    assert_eq!(r.local_nnz(), 8 * 27);
}

#[test]
fn strip_partition_reproduces_the_serial_operator() {
    let dim = AgglomerateDim::new(2, 2, 1);
    let serial = {
        let dof_handler = unit_cube(2, 3, 0, 1);
        let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &NoComm).unwrap();
        AmgeHost::new(&NoComm, &dof_handler)
            .setup_restrictor(&dim, 1, 1e-14, &LaplaceEvaluator, &operator)
            .unwrap()
    };

    let parallel = on_ranks(2, move |comm| {
        let dof_handler = unit_cube(2, 3, comm.rank(), comm.size());
        let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &comm).unwrap();
        let r = AmgeHost::new(&comm, &dof_handler)
            .setup_restrictor(&dim, 1, 1e-14, &LaplaceEvaluator, &operator)
            .unwrap();
        let rows: Vec<(u64, Vec<(u64, f64)>)> =
            r.local_range().map(|row| (row, r.row(row).collect())).collect();
        (r.m(), r.frobenius_norm(&comm), rows)
    });

    let serial_norm = serial.frobenius_norm(&NoComm);
    for (m, norm, rows) in parallel {
        assert_eq!(m, serial.m());
        assert!((norm - serial_norm).abs() < 1e-12);
        for (row, entries) in rows {
            let expected: Vec<(u64, f64)> = serial.row(row).collect();
            assert_eq!(entries.len(), expected.len());
            for ((c, v), (ec, ev)) in entries.into_iter().zip(expected) {
                assert_eq!(c, ec);
                assert!((v - ev).abs() < 1e-12, "row {row} col {c}: {v} vs {ev}");
            }
        }
    }
}

#[test]
fn one_failing_rank_fails_every_rank() {
    let results = on_ranks(2, |comm| {
        let dof_handler = unit_cube(2, 2, comm.rank(), comm.size());
        let (_, operator) = EvaluatorKind::Laplace.evaluate(&dof_handler, &comm).unwrap();
        AmgeHost::new(&comm, &dof_handler)
            .with_eigensolver(Refusing {
                fail: comm.rank() == 1,
            })
            .setup_restrictor(
                &AgglomerateDim::default(),
                1,
                1e-14,
                &LaplaceEvaluator,
                &operator,
            )
            .map(|r| r.m())
    });
    assert!(matches!(results[0], Err(AmgeError::PeerFailure(_))));
    assert!(matches!(
        results[1],
        Err(AmgeError::EigensolverNonConvergence { requested: 1, .. })
    ));
}

#[test]
fn invalid_configuration_is_rejected_on_every_rank() {
    let results = on_ranks(2, |comm| {
        let dof_handler = unit_cube(2, 1, comm.rank(), comm.size());
        let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &comm).unwrap();
        let mut config = AmgeConfig::default();
        config.agglomeration.nx = 0;
        AmgeHost::new(&comm, &dof_handler)
            .setup_restrictor_from_config(&config, &LaplaceEvaluator, &operator)
            .map(|r| r.m())
    });
    for r in results {
        assert!(matches!(r, Err(AmgeError::InvalidConfig(_))));
    }
}

#[test]
fn unit_modes_copy_the_weights() {
    let dof_handler = unit_cube(2, 1, 0, 1);
    let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &NoComm).unwrap();
    // one agglomerate per cell of a 2x2 grid; the centre DOF is shared by four
    let r = AmgeHost::new(&NoComm, &dof_handler)
        .with_eigensolver(Refusing { fail: false })
        .setup_restrictor(&AgglomerateDim::default(), 1, 1e-14, &LaplaceEvaluator, &operator)
        .unwrap();
    assert_eq!(r.m(), 4);
    // each agglomerate's first DOF is its lower-left vertex
    assert_eq!(r.get(0, 0).unwrap(), 1.0);
    assert_eq!(r.get(1, 1).unwrap(), 0.5);
    assert_eq!(r.get(3, 4).unwrap(), 0.25);
    assert_eq!(r.get(0, 4).unwrap(), 0.0);
}

#[test]
fn nan_eigenvectors_never_reach_assembly() {
    let dof_handler = unit_cube(2, 2, 0, 1);
    let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &NoComm).unwrap();
    let r = AmgeHost::new(&NoComm, &dof_handler)
        .with_eigensolver(Constant { value: f64::NAN })
        .setup_restrictor(
            &AgglomerateDim::new(2, 2, 1),
            1,
            1e-14,
            &LaplaceEvaluator,
            &operator,
        );
    assert!(matches!(
        r,
        Err(AmgeError::EigensolverNonConvergence { requested: 1, .. })
    ));
}

#[test]
fn direct_entry_rejects_bad_tolerances() {
    let dof_handler = unit_cube(2, 1, 0, 1);
    let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &NoComm).unwrap();
    let host = AmgeHost::new(&NoComm, &dof_handler);
    for tolerance in [f64::NAN, -1e-14, 0.0, f64::INFINITY] {
        let r = host.setup_restrictor(
            &AgglomerateDim::default(),
            1,
            tolerance,
            &LaplaceEvaluator,
            &operator,
        );
        assert!(matches!(r, Err(AmgeError::InvalidConfig(_))), "{tolerance}");
    }
    let r = host.setup_restrictor(
        &AgglomerateDim::default(),
        0,
        1e-14,
        &LaplaceEvaluator,
        &operator,
    );
    assert!(matches!(r, Err(AmgeError::InvalidConfig(_))));
}

/// Identity on `n` rows, all owned by rank 0.
fn identity_on_rank_zero<C: Communicator + Sync>(n: u64, comm: &C) -> DistributedSparseMatrix {
    let part = Arc::new(IndexPartition::from_sizes(&[n, 0]));
    let mut dsp = DynamicSparsityPattern::new(part.clone(), part, comm.rank());
    if comm.rank() == 0 {
        for i in 0..n {
            dsp.add(i, i).unwrap();
        }
    }
    let mut a = DistributedSparseMatrix::new(dsp.compress(comm, CommTag::new(0x7500)).unwrap());
    if comm.rank() == 0 {
        for i in 0..n {
            a.set(i, i, 1.0).unwrap();
        }
    }
    a.compress(CompressMode::Insert, comm).unwrap();
    a
}

#[test]
fn wrapped_operator_with_foreign_row_layout_is_rejected() {
    let results = on_ranks(2, |comm| {
        let dof_handler = unit_cube(2, 2, comm.rank(), comm.size());
        let evaluator = MatrixEvaluator::new(identity_on_rank_zero(dof_handler.n_dofs(), &comm));
        evaluator.evaluate(&dof_handler, &comm).map(|(_, a)| a.m())
    });
    for r in results {
        assert!(matches!(
            r,
            Err(AmgeError::InvalidMesh(_)) | Err(AmgeError::PeerFailure(_))
        ));
    }
}
