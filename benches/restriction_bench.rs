use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use sieve_amge::prelude::*;

fn unit_square(refinements: u32) -> DofHandler {
    let mut mesh = HyperCubeMesh::new(2, 0, 1).expect("mesh");
    mesh.refine_global(refinements).expect("refine");
    DofHandler::distribute_dofs(&mesh)
}

fn bench_setup_restrictor(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup_restrictor");
    group.sample_size(10);

    for &(refinements, extent) in &[(4u32, 2usize), (5, 4), (6, 4)] {
        let dof_handler = unit_square(refinements);
        let (_, operator) = LaplaceEvaluator
            .evaluate(&dof_handler, &NoComm)
            .expect("operator");
        let host = AmgeHost::new(&NoComm, &dof_handler);
        let dim = AgglomerateDim::new(extent, extent, 1);
        group.bench_with_input(
            BenchmarkId::new(format!("{extent}x{extent}"), dof_handler.n_dofs()),
            &dim,
            |b, dim| {
                b.iter(|| {
                    host.setup_restrictor(dim, 2, 1e-12, &LaplaceEvaluator, &operator)
                        .expect("restrictor")
                })
            },
        );
    }
    group.finish();
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_restriction_sparse_matrix");

    for &refinements in &[5u32, 7] {
        let dof_handler = unit_square(refinements);
        let (_, reference) = LaplaceEvaluator
            .evaluate(&dof_handler, &NoComm)
            .expect("operator");
        let n = dof_handler.n_dofs() as usize;
        let mut rng = SmallRng::seed_from_u64(42);
        let maps: Vec<Vec<u64>> = (0..n)
            .map(|_| sample(&mut rng, n, 3).into_iter().map(|k| k as u64).collect())
            .collect();
        let eigenvectors: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let n_local = vec![1usize; n];
        let diag = compute_diag_elements(&maps, reference.row_partition(), &NoComm)
            .expect("weights");

        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| {
                sieve_amge::amge::compute_restriction_sparse_matrix(
                    &eigenvectors,
                    &diag,
                    &maps,
                    &n_local,
                    &reference,
                    &NoComm,
                )
                .expect("assembly")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_setup_restrictor, bench_assembly);
criterion_main!(benches);
