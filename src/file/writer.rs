//! Growable little-endian byte sink.
//!
//! [`crate::file::writer::Writer`] is the write half of the record codec and the buffer the
//! storage allocator and section synthesizer assemble section contents in. Unlike the fixed-size
//! helpers in [`crate::file::io`], it grows on demand, so writes cannot fail.
//!
//! # Usage Examples
//!
//! ```rust
//! use modtweak::{Parser, Writer};
//!
//! let mut writer = Writer::new();
//! writer.write_le(1u32);
//! writer.write_prefixed_string("pe32+");
//! writer.align(8, 0x00);
//! assert_eq!(writer.pos(), 16);
//!
//! let bytes = writer.into_inner();
//! let mut parser = Parser::new(&bytes);
//! assert_eq!(parser.read_le::<u32>()?, 1);
//! assert_eq!(parser.read_prefixed_string()?, "pe32+");
//! # Ok::<(), modtweak::Error>(())
//! ```

use crate::file::io::LeIO;

/// An append-only byte buffer with little-endian primitives.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Writer { data: Vec::new() }
    }

    /// Create an empty writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far, which is also the offset of the next write.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append a value in little-endian byte order.
    pub fn write_le<T: LeIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Append a flag as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a string as a `u32` byte length followed by its UTF-8 bytes.
    ///
    /// # Panics
    /// Panics if the string is longer than `u32::MAX` bytes.
    pub fn write_prefixed_string(&mut self, value: &str) {
        #[allow(clippy::cast_possible_truncation)]
        let length = value.len() as u32;
        self.write_le(length);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Pad with `fill` until the position is a multiple of `alignment`.
    ///
    /// An alignment of `0` or `1` is a no-op.
    pub fn align(&mut self, alignment: usize, fill: u8) {
        if alignment <= 1 {
            return;
        }

        let padding = (alignment - (self.data.len() % alignment)) % alignment;
        self.data.resize(self.data.len() + padding, fill);
    }

    /// Consume the writer and return the buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
