//! Mathematical utility functions.

use crate::Result;

/// Converts a `usize` to `u32` for PE serialization, returning an error if the value
/// exceeds `u32::MAX`. Every size and address inside a PE32+ image is 32 bits wide.
///
/// # Errors
///
/// Returns an error if `value` exceeds `u32::MAX`.
pub fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| malformed_error!("PE serialization value {value} exceeds u32::MAX"))
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// An alignment of `0` or `1` returns `value` unchanged. PE alignments are powers of two, but
/// any alignment is accepted.
///
/// # Errors
///
/// Returns an error if the aligned value does not fit in a `u32`.
pub fn align_to(value: u32, alignment: u32) -> Result<u32> {
    if alignment <= 1 {
        return Ok(value);
    }

    let remainder = value % alignment;
    if remainder == 0 {
        return Ok(value);
    }

    value
        .checked_add(alignment - remainder)
        .ok_or_else(|| malformed_error!("Aligning 0x{value:X} to 0x{alignment:X} overflows"))
}
