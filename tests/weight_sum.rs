mod util;
use util::*;

use nalgebra::DMatrix;
use sieve_amge::algs::communicator::{Communicator, NoComm};
use sieve_amge::amge::{AmgeHost, Eigenpairs, LocalEigensolver, NonConvergence};
use sieve_amge::config::AmgeConfig;
use sieve_amge::discretization::{DofHandler, MatrixEvaluator, MeshEvaluator};
use sieve_amge::linalg::{DistributedSparseMatrix, DistributedVector};

/// Every eigenvector is uniformly 1/3.
struct ThirdsEigensolver;

impl LocalEigensolver for ThirdsEigensolver {
    fn solve(
        &self,
        matrix: &DMatrix<f64>,
        k: usize,
        _tolerance: f64,
    ) -> Result<Eigenpairs, NonConvergence> {
        Ok(Eigenpairs {
            eigenvalues: vec![0.0; k],
            eigenvectors: vec![vec![1.0 / 3.0; matrix.nrows()]; k],
        })
    }
}

fn build<C: Communicator + Sync>(
    config: &AmgeConfig,
    dof_handler: &DofHandler,
    comm: &C,
) -> DistributedSparseMatrix {
    // the operator is assembled once and handed over already built
    let (_, operator) = config.evaluator.evaluate(dof_handler, comm).unwrap();
    let evaluator = MatrixEvaluator::new(operator);
    let (_, checked) = evaluator.evaluate(dof_handler, comm).unwrap();
    assert_eq!(checked.m(), dof_handler.n_dofs());
    let host = AmgeHost::new(comm, dof_handler).with_eigensolver(ThirdsEigensolver);
    host.setup_restrictor_from_config(config, &evaluator, evaluator.matrix())
        .unwrap()
}

/// `|R e_i|_1` for every fine basis vector `e_i`.
fn column_sums<C: Communicator + Sync>(r: &DistributedSparseMatrix, comm: &C) -> Vec<f64> {
    let mut sums = Vec::with_capacity(r.n() as usize);
    for i in 0..r.n() {
        let mut e_i = DistributedVector::new(r.col_partition().clone(), comm.rank());
        let range = e_i.local_range();
        if range.contains(&i) {
            e_i.local_values_mut()[(i - range.start) as usize] = 1.0;
        }
        let mut coarse = DistributedVector::new(r.row_partition().clone(), comm.rank());
        r.vmult(&mut coarse, &e_i, comm).unwrap();
        sums.push(coarse.l1_norm(comm));
    }
    sums
}

fn assert_partition_of_unity(sums: &[f64]) {
    for (i, s) in sums.iter().enumerate() {
        assert!((s - 1.0).abs() < 1e-14, "column {i}: |R e_i|_1 = {s}");
    }
}

#[test]
fn serial_weight_sum_from_json_config() {
    let config: AmgeConfig = serde_json::from_str(
        r#"{ "agglomeration": { "nx": 2, "ny": 3 },
             "eigensolver": { "n_eigenvectors": 1, "tolerance": 1e-14 } }"#,
    )
    .unwrap();
    let dof_handler = unit_cube(2, 4, 0, 1);
    let mut r = build(&config, &dof_handler, &NoComm);
    // 16 / 2 = 8 blocks along x, ceil(16 / 3) = 6 along y
    assert_eq!(r.m(), 48);
    assert_eq!(r.n(), 289);

    r *= 3.0;
    assert_partition_of_unity(&column_sums(&r, &NoComm));
}

#[test]
fn three_rank_weight_sum_from_flat_config() {
    let sums = on_ranks(3, |comm| {
        let config = AmgeConfig::from_pairs([
            ("agglomeration: nx", "2"),
            ("agglomeration: ny", "3"),
            ("eigensolver: number of eigenvectors", "1"),
            ("eigensolver: tolerance", "1e-14"),
        ])
        .unwrap();
        let dof_handler = unit_cube(2, 4, comm.rank(), comm.size());
        let mut r = build(&config, &dof_handler, &comm);
        r *= 3.0;
        column_sums(&r, &comm)
    });
    // every rank sees the same global norms
    assert_eq!(sums[0], sums[1]);
    assert_eq!(sums[1], sums[2]);
    assert_partition_of_unity(&sums[0]);
}

#[test]
fn weight_sum_holds_with_several_eigenvectors_per_agglomerate() {
    let config = AmgeConfig::from_pairs([
        ("agglomeration: nx", "4"),
        ("agglomeration: ny", "4"),
        ("eigensolver: number of eigenvectors", "3"),
    ])
    .unwrap();
    let dof_handler = unit_cube(2, 3, 0, 1);
    let r = build(&config, &dof_handler, &NoComm);
    assert_eq!(r.m(), 4 * 3);

    // three rows of 1/3 per agglomerate need no rescaling
    for s in column_sums(&r, &NoComm) {
        assert!((s - 1.0).abs() < 1e-14);
    }
}
