#![allow(dead_code)]
use std::thread;

use sieve_amge::algs::communicator::RayonComm;
use sieve_amge::discretization::{DofHandler, HyperCubeMesh};

/// Two Rayon ranks (0 and 1) on the process-wide mailbox.
pub fn rayons() -> (RayonComm, RayonComm) {
    (RayonComm::new(0, 2), RayonComm::new(1, 2))
}

/// Run `f` on every rank of a fresh `n`-rank world, one thread per rank.
/// Results come back ordered by rank.
pub fn on_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(RayonComm) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = RayonComm::world(n)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

/// Unit hypercube refined `refinements` times with Q1 DOFs, as seen by
/// `rank` of `n_ranks`.
pub fn unit_cube(dim: usize, refinements: u32, rank: usize, n_ranks: usize) -> DofHandler {
    let mut mesh = HyperCubeMesh::new(dim, rank, n_ranks).expect("valid mesh");
    mesh.refine_global(refinements).expect("refinement");
    DofHandler::distribute_dofs(&mesh)
}
