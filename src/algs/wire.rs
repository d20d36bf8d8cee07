//! Fixed, little-endian wire types for matrix and weight exchange paths.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte buffer into owned records. The buffer may come
/// from a `Vec<u8>` with arbitrary alignment, so records are copied out.
pub fn decode_records<T: Pod>(raw: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if width == 0 || raw.len() % width != 0 {
        return Err(format!(
            "buffer of {} bytes is not a whole number of {width}-byte records",
            raw.len()
        ));
    }
    Ok(raw.chunks_exact(width).map(bytemuck::pod_read_unaligned).collect())
}

// All multi-byte integers in these structs are little-endian on the wire.
// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A global index (u64) carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIndex {
    pub id_le: u64,
}
impl WireIndex {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// `(index, value)` pair used by owner reductions.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIndexValue {
    pub index_le: u64,
    pub bits_le: u64,
}
impl WireIndexValue {
    pub fn new(index: u64, value: f64) -> Self {
        Self {
            index_le: index.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn index(&self) -> u64 {
        u64::from_le(self.index_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// One sparse-matrix entry `(row, col, value)`; values travel as raw bits so
/// stored entries round-trip exactly.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub bits_le: u64,
}
impl WireEntry {
    pub fn new(row: u64, col: u64, value: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireIndex>(), 8);
const_assert_eq!(size_of::<WireIndexValue>(), 16);
const_assert_eq!(size_of::<WireEntry>(), 24);
