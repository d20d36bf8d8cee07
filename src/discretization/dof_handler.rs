//! Q1 (vertex) degrees of freedom on a [`HyperCubeMesh`].
//!
//! DOF `i` lives on vertex `i`. Vertex layers along the last axis follow the
//! cell strips: layer `t` belongs to the owner of cell layer `min(t, n - 1)`,
//! which makes every rank's owned DOFs one contiguous range and orders the
//! ranges by rank.

use std::ops::Range;

use crate::discretization::mesh::HyperCubeMesh;
use crate::linalg::index_set::IndexSet;

#[derive(Clone, Debug)]
pub struct DofHandler {
    mesh: HyperCubeMesh,
}

impl DofHandler {
    /// Distribute one DOF per vertex.
    pub fn distribute_dofs(mesh: &HyperCubeMesh) -> Self {
        Self { mesh: mesh.clone() }
    }

    pub fn mesh(&self) -> &HyperCubeMesh {
        &self.mesh
    }

    /// Global number of DOFs.
    pub fn n_dofs(&self) -> u64 {
        self.mesh.n_vertices() as u64
    }

    pub fn dofs_per_cell(&self) -> usize {
        1 << self.mesh.dim()
    }

    /// Contiguous DOF range owned by `rank`.
    pub fn owned_range(&self, rank: usize) -> Range<u64> {
        let layers = self.mesh.owned_layers(rank);
        if layers.is_empty() {
            let at = (layers.start * self.mesh.vertices_per_layer()) as u64;
            return at..at;
        }
        let last_rank_layer = layers.end == self.mesh.cells_per_axis();
        let end_layer = if last_rank_layer {
            layers.end + 1
        } else {
            layers.end
        };
        let per_layer = self.mesh.vertices_per_layer() as u64;
        (layers.start as u64 * per_layer)..(end_layer as u64 * per_layer)
    }

    pub fn locally_owned_dofs(&self) -> IndexSet {
        let mut set = IndexSet::new(self.n_dofs());
        // owned_range never exceeds n_dofs
        let _ = set.add_range(self.owned_range(self.mesh.rank()));
        set
    }

    /// Owned DOFs plus every DOF of a locally owned cell.
    pub fn locally_relevant_dofs(&self) -> IndexSet {
        let mut set = self.locally_owned_dofs();
        let cells = self.mesh.locally_owned_cells();
        if !cells.is_empty() {
            let lo = self.cell_dofs(cells.start).into_iter().min().unwrap_or(0);
            let hi = self
                .cell_dofs(cells.end - 1)
                .into_iter()
                .max()
                .map_or(0, |d| d + 1);
            let _ = set.add_range(lo..hi);
        }
        set
    }

    /// Global DOF indices of a cell, in local vertex order.
    pub fn cell_dofs(&self, cell: usize) -> Vec<u64> {
        self.mesh
            .cell_vertices(cell)
            .into_iter()
            .map(|v| v as u64)
            .collect()
    }

    /// Physical location of a DOF.
    pub fn support_point(&self, dof: u64) -> Vec<f64> {
        self.mesh.vertex_point(dof as usize)
    }
}
