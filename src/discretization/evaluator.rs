//! Mesh evaluators: producers of the fine-grid operator.
//!
//! A [`MeshEvaluator`] turns a DOF handler into a compressed distributed
//! operator and extracts dense agglomerate blocks from it. Cell-based
//! evaluators write element matrices into rows that may belong to a
//! neighbouring strip; those entries travel at `compress(Add)`.

use log::debug;
use nalgebra::DMatrix;
use std::sync::Arc;

use crate::algs::collective::agree_on;
use crate::algs::communicator::{CommTag, Communicator};
use crate::amge_error::AmgeError;
use crate::discretization::dof_handler::DofHandler;
use crate::discretization::element::{local_mass_matrix, local_stiffness_matrix};
use crate::linalg::partition::IndexPartition;
use crate::linalg::sparse_matrix::{CompressMode, DistributedSparseMatrix, ImportedRows};
use crate::linalg::sparsity::{DynamicSparsityPattern, SparsityPattern};

const EVALUATOR_PATTERN_TAG: CommTag = CommTag::new(0x4100);

/// Capability interface for operator producers.
pub trait MeshEvaluator {
    /// Collective: assemble the fine operator on `dof_handler`.
    fn evaluate<C>(
        &self,
        dof_handler: &DofHandler,
        comm: &C,
    ) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
    where
        C: Communicator + Sync;

    /// Dense operator of an agglomerate: the block of the global operator
    /// on `dofs`, read from the already imported `rows`.
    fn evaluate_agglomerate(
        &self,
        dofs: &[u64],
        rows: &ImportedRows,
    ) -> Result<DMatrix<f64>, AmgeError> {
        extract_dense_block(dofs, rows)
    }
}

/// `A[dofs, dofs]` as a dense matrix. Every row in `dofs` must be present in
/// `rows`; columns outside `dofs` are dropped.
pub fn extract_dense_block(dofs: &[u64], rows: &ImportedRows) -> Result<DMatrix<f64>, AmgeError> {
    let n = dofs.len();
    let mut block = DMatrix::zeros(n, n);
    for (i, &dof) in dofs.iter().enumerate() {
        let row = rows
            .get(&dof)
            .ok_or_else(|| AmgeError::InvalidMesh(format!("row {dof} was not imported")))?;
        for (j, &col) in dofs.iter().enumerate() {
            if let Ok(k) = row.binary_search_by_key(&col, |&(c, _)| c) {
                block[(i, j)] = row[k].1;
            }
        }
    }
    Ok(block)
}

/// Assemble a cell-wise bilinear form given by its local matrix.
fn assemble_cellwise<C>(
    dof_handler: &DofHandler,
    local_matrix: &[f64],
    comm: &C,
) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
where
    C: Communicator + Sync,
{
    let mesh = dof_handler.mesh();
    let partition = Arc::new(IndexPartition::from_owned_set(
        &dof_handler.locally_owned_dofs(),
        comm,
    )?);
    let mut dsp = DynamicSparsityPattern::new(partition.clone(), partition, comm.rank());
    for cell in mesh.locally_owned_cells() {
        let dofs = dof_handler.cell_dofs(cell);
        for &row in &dofs {
            dsp.add_entries(row, dofs.iter().copied())?;
        }
    }
    let pattern = dsp.compress(comm, EVALUATOR_PATTERN_TAG)?;

    let n = dof_handler.dofs_per_cell();
    let mut matrix = DistributedSparseMatrix::new(pattern.clone());
    for cell in mesh.locally_owned_cells() {
        let dofs = dof_handler.cell_dofs(cell);
        for (i, &row) in dofs.iter().enumerate() {
            for (j, &col) in dofs.iter().enumerate() {
                matrix.add(row, col, local_matrix[i * n + j])?;
            }
        }
    }
    matrix.compress(CompressMode::Add, comm)?;
    debug!(
        "rank {}: assembled {} cells, {} local nonzeros",
        comm.rank(),
        mesh.locally_owned_cells().len(),
        matrix.local_nnz()
    );
    Ok((pattern, matrix))
}

/// Q1 Laplace operator without boundary conditions (pure Neumann).
#[derive(Clone, Copy, Debug, Default)]
pub struct LaplaceEvaluator;

impl MeshEvaluator for LaplaceEvaluator {
    fn evaluate<C>(
        &self,
        dof_handler: &DofHandler,
        comm: &C,
    ) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
    where
        C: Communicator + Sync,
    {
        let mesh = dof_handler.mesh();
        let local = local_stiffness_matrix(mesh.dim(), mesh.cell_size());
        assemble_cellwise(dof_handler, &local, comm)
    }
}

/// Q1 mass operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct MassEvaluator;

impl MeshEvaluator for MassEvaluator {
    fn evaluate<C>(
        &self,
        dof_handler: &DofHandler,
        comm: &C,
    ) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
    where
        C: Communicator + Sync,
    {
        let mesh = dof_handler.mesh();
        let local = local_mass_matrix(mesh.dim(), mesh.cell_size());
        assemble_cellwise(dof_handler, &local, comm)
    }
}

/// Wraps an operator that was assembled elsewhere. Its rows must be
/// distributed exactly like the DOF handler's owned DOFs.
#[derive(Clone, Debug)]
pub struct MatrixEvaluator {
    matrix: DistributedSparseMatrix,
}

impl MatrixEvaluator {
    pub fn new(matrix: DistributedSparseMatrix) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &DistributedSparseMatrix {
        &self.matrix
    }

    fn check_layout(
        &self,
        dof_handler: &DofHandler,
        rank: usize,
        n_ranks: usize,
    ) -> Result<(), AmgeError> {
        let rows = self.matrix.row_partition();
        if rows.size() != dof_handler.n_dofs() {
            return Err(AmgeError::DimensionMismatch {
                context: "wrapped operator rows",
                expected: dof_handler.n_dofs() as usize,
                got: rows.size() as usize,
            });
        }
        let owned = dof_handler.owned_range(rank);
        let local = rows.local_range(rank);
        if rows.n_ranks() != n_ranks || local != owned {
            return Err(AmgeError::InvalidMesh(format!(
                "wrapped operator owns rows {local:?} on rank {rank}, the DOF handler owns {owned:?}"
            )));
        }
        Ok(())
    }
}

impl MeshEvaluator for MatrixEvaluator {
    fn evaluate<C>(
        &self,
        dof_handler: &DofHandler,
        comm: &C,
    ) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
    where
        C: Communicator + Sync,
    {
        agree_on(
            comm,
            self.check_layout(dof_handler, comm.rank(), comm.size()),
            "operator layout",
        )?;
        Ok((self.matrix.sparsity_pattern().clone(), self.matrix.clone()))
    }
}

/// Evaluator selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    #[default]
    Laplace,
    Mass,
}

impl MeshEvaluator for EvaluatorKind {
    fn evaluate<C>(
        &self,
        dof_handler: &DofHandler,
        comm: &C,
    ) -> Result<(SparsityPattern, DistributedSparseMatrix), AmgeError>
    where
        C: Communicator + Sync,
    {
        match self {
            EvaluatorKind::Laplace => LaplaceEvaluator.evaluate(dof_handler, comm),
            EvaluatorKind::Mass => MassEvaluator.evaluate(dof_handler, comm),
        }
    }
}
