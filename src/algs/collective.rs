//! Small collectives built on [`Communicator::allgather`].
//!
//! Reductions gather every rank's contribution and combine them in rank
//! order, so all ranks see bit-identical results.

use crate::algs::communicator::Communicator;
use crate::amge_error::AmgeError;

/// Gather one `u64` from every rank, ordered by rank.
pub fn allgather_u64<C: Communicator>(comm: &C, value: u64) -> Vec<u64> {
    let n_ranks = comm.size().max(1);
    let mut recvbuf = vec![0u8; n_ranks * size_of::<u64>()];
    comm.allgather(&value.to_le_bytes(), &mut recvbuf);
    recvbuf
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect()
}

/// Global sum of a `u64`.
pub fn allreduce_sum_u64<C: Communicator>(comm: &C, value: u64) -> u64 {
    allgather_u64(comm, value).into_iter().sum()
}

/// Global sum of an `f64`, accumulated in rank order.
pub fn allreduce_sum_f64<C: Communicator>(comm: &C, value: f64) -> f64 {
    allgather_u64(comm, value.to_bits())
        .into_iter()
        .map(f64::from_bits)
        .sum()
}

/// Global maximum of an `f64`.
pub fn allreduce_max_f64<C: Communicator>(comm: &C, value: f64) -> f64 {
    allgather_u64(comm, value.to_bits())
        .into_iter()
        .map(f64::from_bits)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Logical AND across ranks; used to agree on success before returning.
pub fn allreduce_and<C: Communicator>(comm: &C, flag: bool) -> bool {
    allgather_u64(comm, u64::from(flag))
        .into_iter()
        .all(|v| v == 1)
}

/// Collective: succeed only if every rank succeeded. A rank whose own
/// result is fine but whose peers failed gets [`AmgeError::PeerFailure`].
pub fn agree_on<C: Communicator, T>(
    comm: &C,
    local: Result<T, AmgeError>,
    phase: &'static str,
) -> Result<T, AmgeError> {
    if allreduce_and(comm, local.is_ok()) {
        local
    } else {
        Err(local.err().unwrap_or(AmgeError::PeerFailure(phase)))
    }
}
