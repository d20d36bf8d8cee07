//! Distributed linear-algebra containers used by the restriction builder.

pub mod index_set;
pub mod partition;
pub mod sparse_matrix;
pub mod sparsity;
pub mod vector;

pub use index_set::IndexSet;
pub use partition::IndexPartition;
pub use sparse_matrix::{DistributedSparseMatrix, ImportedRows};
pub use sparsity::{DynamicSparsityPattern, SparsityPattern};
pub use vector::{CompressMode, DistributedVector};
