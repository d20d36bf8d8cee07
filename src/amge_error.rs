//! AmgeError: Unified error type for sieve-amge public APIs
//!
//! Every fallible operation in the crate returns `Result<_, AmgeError>`.
//! Structural and invariant violations abort the restrictor build; no
//! partially finalized matrix is ever handed back to the caller.

use crate::amge::agglomerate::AgglomerateId;
use thiserror::Error;

/// Unified error type for restriction-operator construction.
#[derive(Debug, Error)]
pub enum AmgeError {
    /// A write targeted a coordinate that the sparsity pattern never declared.
    #[error("Structural violation: entry ({row}, {col}) is not in the sparsity pattern")]
    StructuralViolation { row: u64, col: u64 },
    /// The matrix was modified after `compress`, or used before it.
    #[error("Matrix state error: {0}")]
    MatrixState(&'static str),
    /// A coordinate was set twice with different values before compression.
    #[error("Conflicting insert at ({row}, {col}): {first} vs {second}")]
    ConflictingInsert {
        row: u64,
        col: u64,
        first: f64,
        second: f64,
    },
    /// The local eigensolver did not converge for an agglomerate, even after retries.
    #[error(
        "Eigensolver did not converge on agglomerate {agglomerate} \
         (requested {requested} eigenpairs at tolerance {tolerance:e})"
    )]
    EigensolverNonConvergence {
        agglomerate: AgglomerateId,
        requested: usize,
        tolerance: f64,
    },
    /// Overlap weights for an index do not form a partition of unity.
    #[error("Weight invariant violated for index {index}: weights sum to {sum}")]
    WeightInvariantViolation { index: u64, sum: f64 },
    /// A row of `dof_indices_maps` claimed the same index twice.
    #[error("Index {index} appears twice in the DOF map of row {row}")]
    DuplicateIndex { row: usize, index: u64 },
    /// Inputs whose lengths must agree do not.
    #[error("Dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// An index was accessed on a rank that does not own it.
    #[error("Index {index} is not owned by rank {rank}")]
    IndexNotOwned { index: u64, rank: usize },
    /// An index lies outside the global index space.
    #[error("Index {index} out of range (size {size})")]
    IndexOutOfRange { index: u64, size: u64 },
    /// Error during communication with a neighbor rank.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Received buffer had a different byte length than announced.
    #[error("Buffer size mismatch with rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Another rank failed during a collective phase; its own error is reported there.
    #[error("Another rank failed during {0}")]
    PeerFailure(&'static str),
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Invalid mesh or discretization parameters.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}

impl AmgeError {
    /// Shorthand for a [`AmgeError::CommError`] with a string source.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        AmgeError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
