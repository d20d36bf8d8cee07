//! Two-stage neighbor exchange: counts first, then fixed-width records.
//!
//! Every function posts all receives before any send and drains every send
//! handle before returning, even when a receive fails.

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut, decode_records};
use crate::amge_error::AmgeError;
use bytemuck::Pod;
use std::collections::{BTreeSet, HashMap};
use std::mem::size_of;

/// Every rank except this one.
pub fn all_peers<C: Communicator>(comm: &C) -> BTreeSet<usize> {
    let me = comm.rank();
    (0..comm.size()).filter(|&r| r != me).collect()
}

/// Posts irecv/isend for the number of records to expect from each neighbor.
/// Every rank in `neighbors` receives a count (zero when nothing is queued).
pub fn exchange_sizes<C>(
    send_counts: &HashMap<usize, usize>,
    comm: &C,
    tag: CommTag,
    neighbors: &BTreeSet<usize>,
) -> Result<HashMap<usize, usize>, AmgeError>
where
    C: Communicator + Sync,
{
    let mut recv_size: Vec<(usize, C::RecvHandle)> = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.push((nbr, h));
    }

    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let count = WireCount::new(send_counts.get(&nbr).copied().unwrap_or(0));
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }

    let mut sizes_in = HashMap::new();
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    let mut cnt = WireCount::new(0);
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    sizes_in.insert(nbr, cnt.get());
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(AmgeError::comm(
                    nbr,
                    format!(
                        "expected {} bytes for size header, got {}",
                        size_of::<WireCount>(),
                        data.len()
                    ),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(AmgeError::comm(
                    nbr,
                    format!("failed to receive size from rank {nbr}"),
                ));
            }
            _ => {} // already have an error; just drain
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Sparse all-to-all of `Pod` records. `outgoing[r]` is delivered to rank `r`;
/// the result maps each peer to the records it sent here. Ranks with nothing
/// to send still take part so that every count is matched.
pub fn exchange_records<T, C>(
    outgoing: &HashMap<usize, Vec<T>>,
    comm: &C,
    tags: ExchangeTags,
) -> Result<HashMap<usize, Vec<T>>, AmgeError>
where
    T: Pod,
    C: Communicator + Sync,
{
    let neighbors = all_peers(comm);
    if neighbors.is_empty() {
        return Ok(HashMap::new());
    }
    let send_counts: HashMap<usize, usize> =
        outgoing.iter().map(|(&r, v)| (r, v.len())).collect();
    let recv_counts = exchange_sizes(&send_counts, comm, tags.sizes, &neighbors)?;

    let mut recv_data: Vec<(usize, usize, C::RecvHandle)> = Vec::with_capacity(neighbors.len());
    for &nbr in &neighbors {
        let n_items = recv_counts.get(&nbr).copied().unwrap_or(0);
        let mut buffer = vec![0u8; n_items * size_of::<T>()];
        let h = comm.irecv(nbr, tags.data.as_u16(), &mut buffer);
        recv_data.push((nbr, n_items, h));
    }

    let empty: Vec<T> = Vec::new();
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in &neighbors {
        let items = outgoing.get(&nbr).unwrap_or(&empty);
        pending_sends.push(comm.isend(nbr, tags.data.as_u16(), cast_slice(items)));
    }

    let mut incoming = HashMap::with_capacity(recv_data.len());
    let mut maybe_err = None;
    for (nbr, n_items, h) in recv_data {
        let expected = n_items * size_of::<T>();
        match h.wait() {
            Some(raw) if raw.len() == expected => {
                if maybe_err.is_none() {
                    match decode_records::<T>(&raw) {
                        Ok(records) => {
                            incoming.insert(nbr, records);
                        }
                        Err(msg) => maybe_err = Some(AmgeError::comm(nbr, msg)),
                    }
                }
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(AmgeError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(AmgeError::comm(
                    nbr,
                    "No data received (wait returned None)",
                ));
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}
