//! Geometric agglomeration of locally owned cells.
//!
//! Owned cells are grouped into blocks of `nx × ny × nz` cells (fewer at the
//! end of an axis). An agglomerate claims every DOF of its cells, so DOFs on
//! block faces, including faces shared with another rank's strip, are claimed
//! by several agglomerates.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::amge_error::AmgeError;
use crate::discretization::dof_handler::DofHandler;
use crate::discretization::mesh::MAX_DIM;

/// Opaque agglomerate identity: owning rank plus block coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgglomerateId {
    pub rank: usize,
    pub block: [usize; MAX_DIM],
}

impl fmt::Display for AgglomerateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.block;
        write!(f, "{}:({x},{y},{z})", self.rank)
    }
}

/// Agglomerate extent in cells along each axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AgglomerateDim {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl Default for AgglomerateDim {
    fn default() -> Self {
        Self {
            nx: 1,
            ny: 1,
            nz: 1,
        }
    }
}

impl AgglomerateDim {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    fn extents(&self) -> [usize; MAX_DIM] {
        [self.nx, self.ny, self.nz]
    }

    /// Every extent used by a `dim`-dimensional mesh must be positive.
    pub fn validate(&self, dim: usize) -> Result<(), AmgeError> {
        let ext = self.extents();
        if let Some(axis) = (0..dim.min(MAX_DIM)).find(|&d| ext[d] == 0) {
            return Err(AmgeError::InvalidConfig(format!(
                "agglomerate extent along axis {axis} must be positive"
            )));
        }
        Ok(())
    }
}

/// One patch of cells and the DOFs it claims.
#[derive(Clone, Debug)]
pub struct Agglomerate {
    pub id: AgglomerateId,
    /// Linear cell ids, ascending.
    pub cells: Vec<usize>,
    /// Global DOF indices, ascending and distinct.
    pub dofs: Vec<u64>,
}

/// Group the locally owned cells of `dof_handler` into agglomerates.
/// Blocks along the last axis start at this rank's first cell layer, so no
/// agglomerate spans two ranks.
pub fn build_agglomerates(
    dof_handler: &DofHandler,
    dim: &AgglomerateDim,
) -> Result<Vec<Agglomerate>, AmgeError> {
    let mesh = dof_handler.mesh();
    dim.validate(mesh.dim())?;
    let ext = dim.extents();
    let last = mesh.dim() - 1;
    let first_layer = mesh.owned_layers(mesh.rank()).start;

    // reversed block coordinates sort like the lexicographic cell order
    let mut blocks: BTreeMap<[usize; MAX_DIM], Vec<usize>> = BTreeMap::new();
    for cell in mesh.locally_owned_cells() {
        let coords = mesh.cell_coords(cell);
        let mut block = [0; MAX_DIM];
        for d in 0..mesh.dim() {
            let c = if d == last {
                coords[d] - first_layer
            } else {
                coords[d]
            };
            block[d] = c / ext[d];
        }
        let key = [block[2], block[1], block[0]];
        blocks.entry(key).or_default().push(cell);
    }

    Ok(blocks
        .into_iter()
        .map(|([z, y, x], cells)| {
            let dofs = cells
                .iter()
                .flat_map(|&c| dof_handler.cell_dofs(c))
                .sorted_unstable()
                .dedup()
                .collect();
            Agglomerate {
                id: AgglomerateId {
                    rank: mesh.rank(),
                    block: [x, y, z],
                },
                cells,
                dofs,
            }
        })
        .collect())
}
