//! Reference discretization: unit hypercube mesh, Q1 DOFs and operator
//! evaluators used to drive the restriction builder.

pub mod dof_handler;
pub mod element;
pub mod evaluator;
pub mod mesh;

pub use dof_handler::DofHandler;
pub use evaluator::{
    EvaluatorKind, LaplaceEvaluator, MassEvaluator, MatrixEvaluator, MeshEvaluator,
    extract_dense_block,
};
pub use mesh::HyperCubeMesh;
