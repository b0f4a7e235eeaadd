//! Cursor-based reader for PE structures and embedded symbol records.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a bounds-checked cursor over a
//! borrowed byte slice. It is the read half of the record codec (the write half is
//! [`crate::file::writer::Writer`]) and is also used to walk import lookup tables and hint/name
//! entries inside a loaded image.
//!
//! # Key Components
//!
//! - [`crate::file::parser::Parser`] - Sequential reader with position tracking and peeking
//!
//! # Usage Examples
//!
//! ```rust
//! use modtweak::Parser;
//!
//! let data = [0x03, 0x00, 0x00, 0x00, b'r', b't', b'i', 0x2A];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_prefixed_string()?, "rti");
//! assert_eq!(parser.peek_le::<u8>()?, 0x2A);
//! assert_eq!(parser.read_le::<u8>()?, 0x2A);
//! assert!(!parser.has_more_data());
//! # Ok::<(), modtweak::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Reads past the end of the data return [`crate::Error::OutOfBounds`]. Strings that are not
//! valid UTF-8 produce [`crate::Error::Malformed`] with the offending offset range.

use crate::{
    file::io::{read_le_at, LeIO},
    Error::OutOfBounds,
    Result,
};

/// A bounds-checked cursor over a byte slice.
///
/// `Parser` never copies the underlying data; byte ranges returned by
/// [`Parser::read_bytes`] borrow from the original slice.
///
/// # Examples
///
/// ```rust
/// use modtweak::Parser;
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data);
///
/// let first = parser.read_le::<u32>()?;
/// assert_eq!(first, 0x04030201);
///
/// parser.seek(6)?;
/// assert_eq!(parser.read_le::<u16>()?, 0x0807);
/// # Ok::<(), modtweak::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if at least one unread byte remains.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// Seeking to `len()` is allowed and leaves the parser exhausted.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying data, independent of the cursor.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a value at the cursor without moving it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn peek_le<T: LeIO>(&self) -> Result<T> {
        let mut temp_position = self.position;
        read_le_at::<T>(self.data, &mut temp_position)
    }

    /// Run `f` and restore the cursor if it fails.
    ///
    /// Used for multi-field reads that must either consume a whole record or nothing.
    ///
    /// # Errors
    /// Returns whatever `f` returns.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    /// Run `f` and always restore the cursor afterwards.
    ///
    /// This is how record headers are peeked: the identifying fields are decoded, then the
    /// position rewinds so the full record can be read by the selected decoder.
    ///
    /// # Errors
    /// Returns whatever `f` returns.
    pub fn peek_with<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        self.position = saved_position;
        result
    }

    /// Read a little-endian value and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_le<T: LeIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a single byte as a flag; any non-zero value is `true`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is exhausted.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_le::<u8>()? != 0)
    }

    /// Read a string prefixed by its byte length as `u32`, encoded as UTF-8.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the declared length exceeds the remaining data,
    /// or [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        self.transactional(|parser| {
            let length = parser.read_le::<u32>()? as usize;
            let start = parser.position;
            let bytes = parser.read_bytes(length)?;

            String::from_utf8(bytes.to_vec()).map_err(|e| {
                malformed_error!(
                    "Invalid UTF-8 string at offset {}-{}: {}",
                    start,
                    start + length,
                    e.utf8_error()
                )
            })
        })
    }

    /// Read a NUL-terminated string.
    ///
    /// The cursor moves past the terminator. A string that runs to the end of the data without a
    /// terminator is rejected, since every such string in a PE image is terminated.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found, or
    /// [`crate::Error::Malformed`] if the bytes are not valid UTF-8.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.position;
        let Some(length) = self.data[start..].iter().position(|&b| b == 0) else {
            return Err(OutOfBounds);
        };

        let bytes = &self.data[start..start + length];
        self.position = start + length + 1;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }

    /// Borrow the next `length` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequence() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0xFF];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u32>().unwrap(), 1);
        assert_eq!(parser.read_le::<u16>().unwrap(), 2);
        assert!(parser.read_bool().unwrap());
        assert!(!parser.has_more_data());
        assert!(matches!(parser.read_le::<u8>(), Err(OutOfBounds)));
    }

    #[test]
    fn seek_bounds() {
        let data = [0u8; 4];
        let mut parser = Parser::new(&data);

        parser.seek(4).unwrap();
        assert_eq!(parser.remaining(), 0);
        assert!(matches!(parser.seek(5), Err(OutOfBounds)));
        assert_eq!(parser.pos(), 4);
    }

    #[test]
    fn prefixed_string() {
        let data = [0x07, 0x00, 0x00, 0x00, b'A', b'M', b'E', b'_', b'R', b'T', b'I'];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_prefixed_string().unwrap(), "AME_RTI");
        assert_eq!(parser.pos(), 11);
    }

    #[test]
    fn prefixed_string_truncated_keeps_position() {
        let data = [0x10, 0x00, 0x00, 0x00, b'x'];
        let mut parser = Parser::new(&data);

        assert!(matches!(parser.read_prefixed_string(), Err(OutOfBounds)));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn prefixed_string_invalid_utf8() {
        let data = [0x02, 0x00, 0x00, 0x00, 0xC3, 0x28];
        let mut parser = Parser::new(&data);

        assert!(matches!(
            parser.read_prefixed_string(),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn cstring() {
        let data = b"\x10\x00GetModule\0rest";
        let mut parser = Parser::new(data);

        parser.advance_by(2).unwrap();
        assert_eq!(parser.read_cstring().unwrap(), "GetModule");
        assert_eq!(parser.pos(), 12);

        assert!(matches!(parser.read_cstring(), Err(OutOfBounds)));
    }

    #[test]
    fn peek_restores() {
        let data = [0x2A, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&data);

        let peeked = parser.peek_with(|p| p.read_le::<u32>()).unwrap();
        assert_eq!(peeked, 42);
        assert_eq!(parser.pos(), 0);
        assert_eq!(parser.peek_le::<u8>().unwrap(), 42);
    }

    #[test]
    fn transactional_rewinds_on_error() {
        let data = [0x01, 0x02];
        let mut parser = Parser::new(&data);

        let result = parser.transactional(|p| {
            p.read_le::<u8>()?;
            p.read_le::<u32>()
        });
        assert!(result.is_err());
        assert_eq!(parser.pos(), 0);
    }
}
