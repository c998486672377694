//! Bounds-checked access to a linear memory snapshot.
//!
//! Pointers arriving from the module are `i32` but address an unsigned
//! space; they are reinterpreted as `u32` before any range check.

use std::ops::Range;

use crate::error::{BridgeError, BridgeResult};

/// Reinterpret a wasm `i32` pointer as an offset.
pub fn offset(ptr: i32) -> u32 {
    ptr as u32
}

fn range(data: &[u8], offset: u32, len: usize) -> BridgeResult<Range<usize>> {
    let start = offset as usize;
    start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .map(|end| start..end)
        .ok_or(BridgeError::OutOfBounds { offset, len })
}

pub fn read_bytes(data: &[u8], offset: u32, len: usize) -> BridgeResult<&[u8]> {
    Ok(&data[range(data, offset, len)?])
}

pub fn write_bytes(data: &mut [u8], offset: u32, bytes: &[u8]) -> BridgeResult<()> {
    let range = range(data, offset, bytes.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

/// Little-endian `i32` at `offset`, as the module itself would load it.
pub fn read_i32(data: &[u8], offset: u32) -> BridgeResult<i32> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
