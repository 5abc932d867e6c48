//! Bounds-checked views over guest linear memory.
//!
//! Every host access to guest memory goes through [`read_bytes`] and
//! [`write_bytes`], which operate on the byte slice Wasmtime exposes for a
//! memory and reject ranges that do not fit instead of truncating them.
//!
//! Transform exports return their output buffer as one `u64`:
//! the offset in the high 32 bits and the length in the low 32 bits.

use wasm_transform_common::OutOfRange;

/// Copy `length` bytes starting at `offset` out of `memory`.
pub fn read_bytes(memory: &[u8], offset: u32, length: u32) -> Result<Vec<u8>, OutOfRange> {
    let range = checked_range(memory.len(), u64::from(offset), u64::from(length))?;
    Ok(memory[range].to_vec())
}

/// Copy `bytes` into `memory` starting at `offset`.
pub fn write_bytes(memory: &mut [u8], offset: u32, bytes: &[u8]) -> Result<(), OutOfRange> {
    let range = checked_range(memory.len(), u64::from(offset), bytes.len() as u64)?;
    memory[range].copy_from_slice(bytes);
    Ok(())
}

fn checked_range(
    memory_size: usize,
    offset: u64,
    length: u64,
) -> Result<std::ops::Range<usize>, OutOfRange> {
    let out_of_range = OutOfRange {
        offset,
        length,
        memory_size: memory_size as u64,
    };

    let end = offset.checked_add(length).ok_or(out_of_range)?;
    if end > memory_size as u64 {
        return Err(out_of_range);
    }

    let start = usize::try_from(offset).map_err(|_| out_of_range)?;
    let end = usize::try_from(end).map_err(|_| out_of_range)?;
    Ok(start..end)
}

/// Split a packed transform result into `(offset, length)`.
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack_ptr_len(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// Pack an output buffer location the way guests return it.
pub const fn pack_ptr_len(offset: u32, length: u32) -> u64 {
    ((offset as u64) << 32) | length as u64
}
