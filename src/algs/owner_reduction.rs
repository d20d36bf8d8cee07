//! Reduce-then-complete for values keyed by global index.
//!
//! Each rank holds partial contributions for some indices. The contributions
//! are summed on the owning rank (phase one), and the totals are copied back
//! to every rank that contributed (phase two). The result therefore agrees on
//! every rank that touched an index.

use std::collections::HashMap;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireIndexValue;
use crate::amge_error::AmgeError;
use crate::linalg::partition::IndexPartition;

/// Communication tags for the two phases.
#[derive(Copy, Clone, Debug)]
pub struct OwnerReductionTags {
    /// Contributions flowing to owners.
    pub reduce: ExchangeTags,
    /// Totals flowing back from owners.
    pub complete: ExchangeTags,
}

impl OwnerReductionTags {
    /// Construct tags from a base, assigning deterministic offsets per phase.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            reduce: ExchangeTags::from_base(base),
            complete: ExchangeTags::from_base(base.offset(2)),
        }
    }
}

/// Collective: sum `local` contributions across ranks. The returned map has
/// the same keys as `local`, each holding the global total for that index.
///
/// Contributions from different ranks are accumulated in rank order, so the
/// totals are independent of message arrival order.
pub fn reduce_to_owners<C>(
    local: &HashMap<u64, f64>,
    partition: &IndexPartition,
    comm: &C,
    tags: OwnerReductionTags,
) -> Result<HashMap<u64, f64>, AmgeError>
where
    C: Communicator + Sync,
{
    let me = comm.rank();

    // Phase 1: contributions to owners.
    let mut outgoing: HashMap<usize, Vec<WireIndexValue>> = HashMap::new();
    let mut owned_partials: Vec<(usize, u64, f64)> = Vec::new();
    let mut routing_error = None;
    for (&index, &value) in local {
        match partition.owner_of(index) {
            Ok(owner) if owner == me => owned_partials.push((me, index, value)),
            Ok(owner) => outgoing
                .entry(owner)
                .or_default()
                .push(WireIndexValue::new(index, value)),
            Err(e) => {
                routing_error.get_or_insert(e);
            }
        }
    }
    // deterministic record order per destination
    for records in outgoing.values_mut() {
        records.sort_unstable_by_key(WireIndexValue::index);
    }
    let incoming = exchange_records(&outgoing, comm, tags.reduce)?;

    let mut contributors: HashMap<usize, Vec<u64>> = HashMap::new();
    for (nbr, records) in &incoming {
        for rec in records {
            if partition.owner_of(rec.index()).ok() != Some(me) {
                routing_error.get_or_insert(AmgeError::comm(
                    *nbr,
                    format!("index {} sent to a non-owner", rec.index()),
                ));
                continue;
            }
            owned_partials.push((*nbr, rec.index(), rec.value()));
            contributors.entry(*nbr).or_default().push(rec.index());
        }
    }
    owned_partials.sort_unstable_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
    let mut totals: HashMap<u64, f64> = HashMap::new();
    for (_, index, value) in owned_partials {
        *totals.entry(index).or_insert(0.0) += value;
    }

    // Phase 2: totals back to contributors.
    let mut replies: HashMap<usize, Vec<WireIndexValue>> = HashMap::new();
    for (nbr, indices) in contributors {
        replies.insert(
            nbr,
            indices
                .into_iter()
                .map(|i| WireIndexValue::new(i, totals.get(&i).copied().unwrap_or(0.0)))
                .collect(),
        );
    }
    let answered = exchange_records(&replies, comm, tags.complete)?;
    if let Some(e) = routing_error {
        return Err(e);
    }

    let mut result = HashMap::with_capacity(local.len());
    for &index in local.keys() {
        if let Some(&t) = totals.get(&index) {
            result.insert(index, t);
        }
    }
    for records in answered.into_values() {
        for rec in records {
            result.insert(rec.index(), rec.value());
        }
    }
    Ok(result)
}
