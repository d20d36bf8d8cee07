#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sieve-amge
//!
//! sieve-amge builds the restriction operator of an element-based algebraic
//! multigrid (AMGe) hierarchy on a distributed sparse system. Locally owned
//! cells are grouped into agglomerates, the smallest eigenvectors of each
//! agglomerate's operator block become coarse basis functions, and the
//! coefficients are weighted so that DOFs shared by several agglomerates
//! form a partition of unity.
//!
//! ## Features
//! - Two-phase distributed sparse assembly: a declared sparsity pattern,
//!   then `set`/`add` and an explicit `compress`
//! - Overlap weights `1 / multiplicity` reduced across ranks
//! - Pluggable communication backends (serial, in-process ranks, MPI)
//! - Reference unit-hypercube mesh, Q1 DOFs and Laplace/mass evaluators
//! - Dense local eigensolves (nalgebra) with a bounded retry policy
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sieve-amge = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```no_run
//! use sieve_amge::prelude::*;
//!
//! # fn main() -> Result<(), AmgeError> {
//! let comm = NoComm;
//! let mut mesh = HyperCubeMesh::new(2, comm.rank(), comm.size())?;
//! mesh.refine_global(4)?;
//! let dof_handler = DofHandler::distribute_dofs(&mesh);
//! let (_, operator) = LaplaceEvaluator.evaluate(&dof_handler, &comm)?;
//! let host = AmgeHost::new(&comm, &dof_handler);
//! let restriction = host.setup_restrictor(
//!     &AgglomerateDim::new(2, 2, 1),
//!     1,
//!     1e-14,
//!     &LaplaceEvaluator,
//!     &operator,
//! )?;
//! assert_eq!(restriction.n(), dof_handler.n_dofs());
//! # Ok(())
//! # }
//! ```
//!
//! ## Determinism
//!
//! Reductions combine contributions in rank order and restriction rows are
//! numbered by rank, so the operator does not depend on message timing.

pub mod algs;
pub mod amge;
pub mod amge_error;
pub mod config;
pub mod debug_invariants;
pub mod discretization;
pub mod linalg;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::amge::{
        AgglomerateDim, AgglomerateId, AmgeHost, DenseEigensolver, EigenRetryPolicy, Eigenpairs,
        LocalEigensolver, NonConvergence, compute_diag_elements, verify_partition_of_unity,
    };
    pub use crate::amge_error::AmgeError;
    pub use crate::config::{AmgeConfig, EigensolverConfig};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::discretization::{
        DofHandler, EvaluatorKind, HyperCubeMesh, LaplaceEvaluator, MassEvaluator,
        MatrixEvaluator, MeshEvaluator,
    };
    pub use crate::linalg::{
        CompressMode, DistributedSparseMatrix, DistributedVector, DynamicSparsityPattern,
        IndexPartition, IndexSet, SparsityPattern,
    };
}
