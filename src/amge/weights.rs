//! Overlap weights forming a partition of unity.
//!
//! Every claim of a fine index receives the weight `1 / multiplicity`, where
//! the multiplicity counts the claims of that index over every agglomerate on
//! every rank. Counts are made in a map local to one build and completed
//! across ranks with [`reduce_to_owners`].

use std::collections::HashMap;

use hashbrown::HashSet;
use log::debug;

use crate::algs::collective::agree_on;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::owner_reduction::{OwnerReductionTags, reduce_to_owners};
use crate::amge_error::AmgeError;
use crate::linalg::partition::IndexPartition;

const WEIGHT_COUNT_TAG: CommTag = CommTag::new(0x3100);
const WEIGHT_VERIFY_TAG: CommTag = CommTag::new(0x3200);

/// Tolerance on `|Σ weights − 1|` used by [`verify_partition_of_unity`].
pub const PARTITION_OF_UNITY_TOLERANCE: f64 = 1e-12;

/// Claims per index on this rank. Fails if a map names an index twice.
pub fn count_claims(dof_indices_maps: &[Vec<u64>]) -> Result<HashMap<u64, u32>, AmgeError> {
    let mut counts: HashMap<u64, u32> = HashMap::new();
    for (row, map) in dof_indices_maps.iter().enumerate() {
        let mut seen: HashSet<u64> = HashSet::with_capacity(map.len());
        for &index in map {
            if !seen.insert(index) {
                return Err(AmgeError::DuplicateIndex { row, index });
            }
            *counts.entry(index).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Turn global claim counts into one weight per (row, slot).
fn weights_from_counts(
    dof_indices_maps: &[Vec<u64>],
    global_counts: &HashMap<u64, f64>,
) -> Result<Vec<Vec<f64>>, AmgeError> {
    dof_indices_maps
        .iter()
        .map(|map| {
            map.iter()
                .map(|index| match global_counts.get(index) {
                    Some(&count) if count >= 1.0 => Ok(1.0 / count),
                    other => Err(AmgeError::WeightInvariantViolation {
                        index: *index,
                        sum: other.copied().unwrap_or(0.0),
                    }),
                })
                .collect()
        })
        .collect()
}

/// Collective: `diag_elements[a][j] = 1 / multiplicity(dof_indices_maps[a][j])`.
///
/// `fine_partition` assigns each fine index to the rank that sums its counts.
/// A failure on any rank fails the call on every rank.
pub fn compute_diag_elements<C>(
    dof_indices_maps: &[Vec<u64>],
    fine_partition: &IndexPartition,
    comm: &C,
) -> Result<Vec<Vec<f64>>, AmgeError>
where
    C: Communicator + Sync,
{
    let counts = agree_on(comm, count_claims(dof_indices_maps), "weight counting")?;
    let local: HashMap<u64, f64> = counts
        .into_iter()
        .map(|(index, count)| (index, f64::from(count)))
        .collect();
    let shared = local.values().filter(|&&c| c > 1.0).count();
    let global = reduce_to_owners(
        &local,
        fine_partition,
        comm,
        OwnerReductionTags::from_base(WEIGHT_COUNT_TAG),
    )?;
    debug!(
        "rank {}: {} claimed indices, {} shared locally",
        comm.rank(),
        local.len(),
        shared
    );
    agree_on(
        comm,
        weights_from_counts(dof_indices_maps, &global),
        "weight assignment",
    )
}

/// Collective: check that the weights of every claimed index sum to one over
/// all ranks.
pub fn verify_partition_of_unity<C>(
    dof_indices_maps: &[Vec<u64>],
    diag_elements: &[Vec<f64>],
    fine_partition: &IndexPartition,
    comm: &C,
) -> Result<(), AmgeError>
where
    C: Communicator + Sync,
{
    let mut sums: HashMap<u64, f64> = HashMap::new();
    let mut shape_error = None;
    if dof_indices_maps.len() != diag_elements.len() {
        shape_error = Some(AmgeError::DimensionMismatch {
            context: "diag_elements rows",
            expected: dof_indices_maps.len(),
            got: diag_elements.len(),
        });
    }
    for (map, diag) in dof_indices_maps.iter().zip(diag_elements) {
        if map.len() != diag.len() {
            shape_error.get_or_insert(AmgeError::DimensionMismatch {
                context: "diag_elements row length",
                expected: map.len(),
                got: diag.len(),
            });
            continue;
        }
        for (&index, &w) in map.iter().zip(diag) {
            *sums.entry(index).or_insert(0.0) += w;
        }
    }
    agree_on(comm, shape_error.map_or(Ok(()), Err), "weight verification")?;

    let totals = reduce_to_owners(
        &sums,
        fine_partition,
        comm,
        OwnerReductionTags::from_base(WEIGHT_VERIFY_TAG),
    )?;
    let mut violation = None;
    let mut keys: Vec<u64> = totals.keys().copied().collect();
    keys.sort_unstable();
    for index in keys {
        let sum = totals[&index];
        if (sum - 1.0).abs() > PARTITION_OF_UNITY_TOLERANCE {
            violation = Some(AmgeError::WeightInvariantViolation { index, sum });
            break;
        }
    }
    agree_on(comm, violation.map_or(Ok(()), Err), "weight verification")
}
