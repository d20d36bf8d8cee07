//! Per-agglomerate data flowing from the eigensolver into assembly.

use crate::amge::agglomerate::AgglomerateId;

/// The coarse basis an agglomerate contributes: its claimed fine indices and
/// one coefficient vector per eigenvector, aligned with `dof_indices`.
#[derive(Clone, Debug)]
pub struct LocalPatch {
    pub id: AgglomerateId,
    pub dof_indices: Vec<u64>,
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Vec<Vec<f64>>,
}

impl LocalPatch {
    pub fn n_eigenvectors(&self) -> usize {
        self.eigenvectors.len()
    }
}

/// Flat arrays consumed by the restriction assembler.
///
/// Coarse row `pos` (local numbering) belongs to agglomerate `a` when
/// `pos` falls in that agglomerate's block of `n_local_eigenvectors[a]`
/// consecutive rows; `eigenvectors[pos]` is aligned with
/// `dof_indices_maps[a]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestrictionInputs {
    pub eigenvectors: Vec<Vec<f64>>,
    pub dof_indices_maps: Vec<Vec<u64>>,
    pub n_local_eigenvectors: Vec<usize>,
}

impl RestrictionInputs {
    /// Number of coarse rows generated on this rank.
    pub fn n_coarse_local(&self) -> usize {
        self.n_local_eigenvectors.iter().sum()
    }
}

impl FromIterator<LocalPatch> for RestrictionInputs {
    fn from_iter<I: IntoIterator<Item = LocalPatch>>(patches: I) -> Self {
        let mut inputs = RestrictionInputs::default();
        for patch in patches {
            inputs.n_local_eigenvectors.push(patch.n_eigenvectors());
            inputs.dof_indices_maps.push(patch.dof_indices);
            inputs.eigenvectors.extend(patch.eigenvectors);
        }
        inputs
    }
}
