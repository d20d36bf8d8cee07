//! Restriction-operator construction for element-based algebraic multigrid.

pub mod agglomerate;
pub mod eigensolver;
pub mod host;
pub mod patch;
pub mod restriction;
pub mod weights;

pub use agglomerate::{Agglomerate, AgglomerateDim, AgglomerateId, build_agglomerates};
pub use eigensolver::{
    DenseEigensolver, EigenRetryPolicy, Eigenpairs, LocalEigensolver, NonConvergence,
    solve_with_retry,
};
pub use host::AmgeHost;
pub use patch::{LocalPatch, RestrictionInputs};
pub use restriction::{compute_restriction_sparse_matrix, compute_restriction_sparsity_pattern};
pub use weights::{compute_diag_elements, count_claims, verify_partition_of_unity};
