//! Bounds-checked little-endian reading and writing of primitive values.
//!
//! Every structure this crate touches, from PE headers over import descriptors to the embedded
//! symbol records, is stored little-endian. This module provides the single primitive layer all
//! of them are read and written through: a [`crate::file::io::LeIO`] trait implemented for the
//! integer types in use, and four free functions that either succeed or report
//! [`crate::Error::OutOfBounds`] without touching the buffer.
//!
//! # Key Components
//!
//! - [`crate::file::io::LeIO`] - Conversion between a primitive and its little-endian bytes
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Reading, optionally advancing an offset
//! - [`crate::file::io::write_le`] / [`crate::file::io::write_le_at`] - Writing, optionally advancing an offset
//!
//! # Usage Examples
//!
//! ```rust
//! use modtweak::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x5A4Du16)?;
//! write_le_at(&mut data, &mut offset, 0x80u32)?;
//! assert_eq!(data, [0x4D, 0x5A, 0x80, 0x00, 0x00, 0x00]);
//!
//! offset = 0;
//! let magic: u16 = read_le_at(&data, &mut offset)?;
//! let lfanew: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!((magic, lfanew, offset), (0x5A4D, 0x80, 6));
//! # Ok::<(), modtweak::Error>(())
//! ```
//!
//! # Error Handling
//!
//! A read or write that would cross the end of the buffer returns [`crate::Error::OutOfBounds`]
//! and leaves both the buffer and the offset unchanged.

use crate::{Error::OutOfBounds, Result};

/// A primitive that can be converted to and from its little-endian byte representation.
///
/// Implemented for the unsigned and signed integer widths that appear in PE structures and in
/// the symbol record format.
pub trait LeIO: Sized {
    /// The fixed-size byte array holding one encoded value.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into its little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_le_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LeIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_le_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Reads a little-endian `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: LeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a little-endian `T` at `offset` and advances `offset` past it.
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Position to read at, advanced by `size_of::<T>()` on success
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: LeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Writes `value` little-endian at the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn write_le<T: LeIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes `value` little-endian at `offset` and advances `offset` past it.
///
/// # Arguments
///
/// * `data` - The mutable byte buffer to write to
/// * `offset` - Position to write at, advanced by `size_of::<T>()` on success
/// * `value` - The value to write
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn write_le_at<T: LeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}
