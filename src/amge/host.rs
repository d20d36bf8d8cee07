//! Restrictor orchestration on one rank.
//!
//! [`AmgeHost::setup_restrictor`] runs the full pipeline:
//!
//! 1. PARTITION: owned cells are grouped into agglomerates.
//! 2. EXTRACT: operator rows of every claimed DOF are imported and each
//!    agglomerate's dense block is evaluated.
//! 3. SOLVE: the smallest eigenpairs of every block (in parallel with the
//!    `rayon` feature).
//! 4. BUILD-MAPS: one coarse row per (agglomerate, eigenvector).
//! 5. WEIGHT: `1 / multiplicity` per claim, checked for partition of unity.
//! 6. ASSEMBLE: sparsity declaration, insertion and compress.
//!
//! Nothing survives between calls. Every step that can fail on one rank is
//! agreed on before the next collective, so all ranks return together.

use std::collections::BTreeSet;

use log::{debug, info};
use nalgebra::DMatrix;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::algs::collective::agree_on;
use crate::algs::communicator::Communicator;
use crate::amge::agglomerate::{Agglomerate, AgglomerateDim, build_agglomerates};
use crate::amge::eigensolver::{
    DenseEigensolver, EigenRetryPolicy, LocalEigensolver, solve_with_retry,
};
use crate::amge::patch::{LocalPatch, RestrictionInputs};
use crate::amge::restriction;
use crate::amge::weights::{compute_diag_elements, verify_partition_of_unity};
use crate::amge_error::AmgeError;
use crate::config::{AmgeConfig, validate_eigen_request};
use crate::discretization::dof_handler::DofHandler;
use crate::discretization::evaluator::MeshEvaluator;
use crate::linalg::sparse_matrix::DistributedSparseMatrix;

/// Builds restriction operators for one DOF handler on one rank.
pub struct AmgeHost<'a, C: Communicator> {
    comm: &'a C,
    dof_handler: &'a DofHandler,
    eigensolver: Box<dyn LocalEigensolver + 'a>,
    retry: EigenRetryPolicy,
}

impl<'a, C> AmgeHost<'a, C>
where
    C: Communicator + Sync,
{
    /// Host using the dense nalgebra eigensolver and the default retry policy.
    pub fn new(comm: &'a C, dof_handler: &'a DofHandler) -> Self {
        Self {
            comm,
            dof_handler,
            eigensolver: Box::new(DenseEigensolver::default()),
            retry: EigenRetryPolicy::default(),
        }
    }

    /// Host whose dense eigensolver and retry policy follow `config`.
    pub fn from_config(comm: &'a C, dof_handler: &'a DofHandler, config: &AmgeConfig) -> Self {
        Self {
            comm,
            dof_handler,
            eigensolver: Box::new(DenseEigensolver {
                max_iterations: config.eigensolver.max_iterations,
            }),
            retry: config.eigensolver.retry_policy(),
        }
    }

    pub fn with_eigensolver<S: LocalEigensolver + 'a>(mut self, solver: S) -> Self {
        self.eigensolver = Box::new(solver);
        self
    }

    pub fn with_retry_policy(mut self, retry: EigenRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dof_handler(&self) -> &DofHandler {
        self.dof_handler
    }

    /// Collective: [`setup_restrictor`](Self::setup_restrictor) with every
    /// parameter taken from `config`.
    pub fn setup_restrictor_from_config<E: MeshEvaluator>(
        &self,
        config: &AmgeConfig,
        evaluator: &E,
        global_operator: &DistributedSparseMatrix,
    ) -> Result<DistributedSparseMatrix, AmgeError> {
        agree_on(self.comm, config.validate(), "configuration")?;
        self.build(
            &config.agglomeration,
            config.eigensolver.n_eigenvectors,
            config.eigensolver.tolerance,
            &config.eigensolver.retry_policy(),
            evaluator,
            global_operator,
        )
    }

    /// Collective: build the restriction operator (coarse rows × fine
    /// columns) for `global_operator`.
    pub fn setup_restrictor<E: MeshEvaluator>(
        &self,
        agglomerate_dim: &AgglomerateDim,
        n_eigenvectors: usize,
        tolerance: f64,
        evaluator: &E,
        global_operator: &DistributedSparseMatrix,
    ) -> Result<DistributedSparseMatrix, AmgeError> {
        agree_on(
            self.comm,
            validate_eigen_request(n_eigenvectors, tolerance, &self.retry),
            "configuration",
        )?;
        self.build(
            agglomerate_dim,
            n_eigenvectors,
            tolerance,
            &self.retry,
            evaluator,
            global_operator,
        )
    }

    fn build<E: MeshEvaluator>(
        &self,
        agglomerate_dim: &AgglomerateDim,
        n_eigenvectors: usize,
        tolerance: f64,
        retry: &EigenRetryPolicy,
        evaluator: &E,
        global_operator: &DistributedSparseMatrix,
    ) -> Result<DistributedSparseMatrix, AmgeError> {
        let comm = self.comm;

        // PARTITION
        let agglomerates = agree_on(
            comm,
            build_agglomerates(self.dof_handler, agglomerate_dim),
            "agglomeration",
        )?;
        debug!("rank {}: {} agglomerates", comm.rank(), agglomerates.len());

        // EXTRACT
        let wanted: BTreeSet<u64> = agglomerates
            .iter()
            .flat_map(|a| a.dofs.iter().copied())
            .collect();
        let rows = global_operator.import_rows(&wanted, comm)?;
        let blocks: Result<Vec<DMatrix<f64>>, AmgeError> = agglomerates
            .iter()
            .map(|a| evaluator.evaluate_agglomerate(&a.dofs, &rows))
            .collect();
        let blocks = agree_on(comm, blocks, "agglomerate extraction")?;
        debug!(
            "rank {}: extracted {} blocks from {} imported rows",
            comm.rank(),
            blocks.len(),
            rows.len()
        );

        // SOLVE
        let patches = agree_on(
            comm,
            self.solve_all(agglomerates, &blocks, n_eigenvectors, tolerance, retry),
            "local eigensolves",
        )?;

        // BUILD-MAPS
        let inputs: RestrictionInputs = patches.into_iter().collect();

        // WEIGHT
        let fine_partition = global_operator.row_partition();
        let diag_elements = compute_diag_elements(&inputs.dof_indices_maps, fine_partition, comm)?;
        verify_partition_of_unity(
            &inputs.dof_indices_maps,
            &diag_elements,
            fine_partition,
            comm,
        )?;

        // ASSEMBLE
        let restriction = self.compute_restriction_sparse_matrix(
            &inputs.eigenvectors,
            &diag_elements,
            &inputs.dof_indices_maps,
            &inputs.n_local_eigenvectors,
            global_operator,
        )?;
        info!(
            "restrictor built: {} coarse x {} fine, {} local coarse rows on rank {}",
            restriction.m(),
            restriction.n(),
            inputs.n_coarse_local(),
            comm.rank()
        );
        Ok(restriction)
    }

    /// Collective: assemble the restriction operator from precomputed patch
    /// data. See [`restriction`] for the index conventions.
    pub fn compute_restriction_sparse_matrix(
        &self,
        eigenvectors: &[Vec<f64>],
        diag_elements: &[Vec<f64>],
        dof_indices_maps: &[Vec<u64>],
        n_local_eigenvectors: &[usize],
        reference_matrix: &DistributedSparseMatrix,
    ) -> Result<DistributedSparseMatrix, AmgeError> {
        restriction::compute_restriction_sparse_matrix(
            eigenvectors,
            diag_elements,
            dof_indices_maps,
            n_local_eigenvectors,
            reference_matrix,
            self.comm,
        )
    }

    fn solve_one(
        &self,
        agglomerate: Agglomerate,
        block: &DMatrix<f64>,
        n_eigenvectors: usize,
        tolerance: f64,
        retry: &EigenRetryPolicy,
    ) -> Result<LocalPatch, AmgeError> {
        let pairs = solve_with_retry(
            self.eigensolver.as_ref(),
            agglomerate.id,
            block,
            n_eigenvectors,
            tolerance,
            retry,
        )?;
        Ok(LocalPatch {
            id: agglomerate.id,
            dof_indices: agglomerate.dofs,
            eigenvalues: pairs.eigenvalues,
            eigenvectors: pairs.eigenvectors,
        })
    }

    #[cfg(feature = "rayon")]
    fn solve_all(
        &self,
        agglomerates: Vec<Agglomerate>,
        blocks: &[DMatrix<f64>],
        n_eigenvectors: usize,
        tolerance: f64,
        retry: &EigenRetryPolicy,
    ) -> Result<Vec<LocalPatch>, AmgeError> {
        agglomerates
            .into_par_iter()
            .zip(blocks.par_iter())
            .map(|(agg, block)| self.solve_one(agg, block, n_eigenvectors, tolerance, retry))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn solve_all(
        &self,
        agglomerates: Vec<Agglomerate>,
        blocks: &[DMatrix<f64>],
        n_eigenvectors: usize,
        tolerance: f64,
        retry: &EigenRetryPolicy,
    ) -> Result<Vec<LocalPatch>, AmgeError> {
        agglomerates
            .into_iter()
            .zip(blocks)
            .map(|(agg, block)| self.solve_one(agg, block, n_eigenvectors, tolerance, retry))
            .collect()
    }
}
