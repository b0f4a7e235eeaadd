//! Address newtypes used while laying out patched images.
//!
//! Storage is first allocated inside a standalone buffer whose final location is unknown, then
//! placed into a new section. Keeping buffer offsets and image addresses as distinct types makes
//! the one legal conversion between them, [`RelativeOffset::rebase`], explicit.

use std::fmt;

/// A relative virtual address inside a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rva(pub u32);

impl Rva {
    /// The raw address value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// The address `offset` bytes further on.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the result does not fit 32 bits.
    pub fn checked_add(self, offset: u32) -> crate::Result<Rva> {
        self.0
            .checked_add(offset)
            .map(Rva)
            .ok_or_else(|| malformed_error!("RVA overflow - 0x{:X} + 0x{:X}", self.0, offset))
    }
}

impl fmt::Display for Rva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for Rva {
    fn from(value: u32) -> Self {
        Rva(value)
    }
}

/// An offset inside a storage buffer that has not been placed in an image yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RelativeOffset(pub u32);

impl RelativeOffset {
    /// The raw offset value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Convert to an image address, given the address the buffer was placed at.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the result does not fit 32 bits.
    pub fn rebase(self, base: Rva) -> crate::Result<Rva> {
        base.checked_add(self.0)
    }
}

impl fmt::Display for RelativeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+0x{:X}", self.0)
    }
}
