//! Structured unit-hypercube mesh distributed in strips.
//!
//! The mesh covers `[0, 1]^dim` with `2^refinements` cells per axis. Cells
//! and vertices are numbered lexicographically with the x index running
//! fastest. Cell layers along the last axis are dealt out to ranks in
//! contiguous strips, so every rank owns a slab of cells and the partition is
//! a pure function of `(dim, refinements, n_ranks)`.

use std::ops::Range;

use crate::amge_error::AmgeError;

/// Highest supported spatial dimension.
pub const MAX_DIM: usize = 3;

/// Integer cell coordinates, one entry per axis (unused axes are zero).
pub type CellCoords = [usize; MAX_DIM];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HyperCubeMesh {
    dim: usize,
    refinements: u32,
    rank: usize,
    n_ranks: usize,
}

impl HyperCubeMesh {
    /// A single cell covering the unit hypercube.
    pub fn new(dim: usize, rank: usize, n_ranks: usize) -> Result<Self, AmgeError> {
        if dim == 0 || dim > MAX_DIM {
            return Err(AmgeError::InvalidMesh(format!(
                "dimension must be 1, 2 or 3 (got {dim})"
            )));
        }
        if n_ranks == 0 || rank >= n_ranks {
            return Err(AmgeError::InvalidMesh(format!(
                "rank {rank} is not part of a {n_ranks}-rank communicator"
            )));
        }
        Ok(Self {
            dim,
            refinements: 0,
            rank,
            n_ranks,
        })
    }

    /// Bisect every cell along every axis `times` times.
    pub fn refine_global(&mut self, times: u32) -> Result<(), AmgeError> {
        let total = self.refinements + times;
        // keep the vertex count addressable
        if (total as usize) * self.dim > 60 {
            return Err(AmgeError::InvalidMesh(format!(
                "{total} refinements in {}D exceed the index space",
                self.dim
            )));
        }
        self.refinements = total;
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn refinements(&self) -> u32 {
        self.refinements
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    /// Cells per axis.
    pub fn cells_per_axis(&self) -> usize {
        1usize << self.refinements
    }

    /// Cell edge length.
    pub fn cell_size(&self) -> f64 {
        1.0 / self.cells_per_axis() as f64
    }

    pub fn n_cells(&self) -> usize {
        self.cells_per_axis().pow(self.dim as u32)
    }

    pub fn n_vertices(&self) -> usize {
        (self.cells_per_axis() + 1).pow(self.dim as u32)
    }

    /// Cells in one layer orthogonal to the last axis.
    pub fn cells_per_layer(&self) -> usize {
        self.cells_per_axis().pow(self.dim as u32 - 1)
    }

    /// Vertices in one layer orthogonal to the last axis.
    pub fn vertices_per_layer(&self) -> usize {
        (self.cells_per_axis() + 1).pow(self.dim as u32 - 1)
    }

    /// Cell layers (along the last axis) owned by `rank`.
    pub fn owned_layers(&self, rank: usize) -> Range<usize> {
        let n = self.cells_per_axis();
        let p = self.n_ranks;
        (rank * n / p)..((rank + 1) * n / p)
    }

    /// Rank owning cell layer `layer`.
    pub fn layer_owner(&self, layer: usize) -> usize {
        // inverse of `owned_layers`: largest r with r * n / p <= layer
        let n = self.cells_per_axis();
        let p = self.n_ranks;
        let mut r = ((layer + 1) * p).div_ceil(n).saturating_sub(1).min(p - 1);
        while r > 0 && self.owned_layers(r).start > layer {
            r -= 1;
        }
        while self.owned_layers(r).end <= layer && r + 1 < p {
            r += 1;
        }
        r
    }

    /// Linear ids of the cells owned by this rank, ascending.
    pub fn locally_owned_cells(&self) -> Range<usize> {
        let layers = self.owned_layers(self.rank);
        let per_layer = self.cells_per_layer();
        (layers.start * per_layer)..(layers.end * per_layer)
    }

    pub fn is_locally_owned_cell(&self, cell: usize) -> bool {
        self.locally_owned_cells().contains(&cell)
    }

    /// Integer coordinates of a cell.
    pub fn cell_coords(&self, cell: usize) -> CellCoords {
        let n = self.cells_per_axis();
        let mut coords = [0; MAX_DIM];
        let mut rest = cell;
        for c in coords.iter_mut().take(self.dim) {
            *c = rest % n;
            rest /= n;
        }
        coords
    }

    /// Linear id of the cell at `coords`.
    pub fn cell_index(&self, coords: &CellCoords) -> usize {
        let n = self.cells_per_axis();
        coords[..self.dim]
            .iter()
            .rev()
            .fold(0, |acc, &c| acc * n + c)
    }

    /// Lexicographic vertex ids of a cell; local vertex `v` sits at offset
    /// `(v >> d) & 1` along axis `d`.
    pub fn cell_vertices(&self, cell: usize) -> Vec<usize> {
        let coords = self.cell_coords(cell);
        let nv = self.cells_per_axis() + 1;
        (0..1usize << self.dim)
            .map(|v| {
                (0..self.dim).rev().fold(0, |acc, d| {
                    acc * nv + coords[d] + ((v >> d) & 1)
                })
            })
            .collect()
    }

    /// Physical coordinates of a vertex.
    pub fn vertex_point(&self, vertex: usize) -> Vec<f64> {
        let nv = self.cells_per_axis() + 1;
        let h = self.cell_size();
        let mut rest = vertex;
        (0..self.dim)
            .map(|_| {
                let i = rest % nv;
                rest /= nv;
                i as f64 * h
            })
            .collect()
    }
}
