//! Scratch storage for symbols the runtime resolver has to fill in.
//!
//! The storage buffer starts with an 8-byte slot the runtime keeps its own state in. After it,
//! every symbol that needs storage gets one of two kinds of allocation:
//!
//! - a thunk, 16-byte aligned, used by virtual destructors:
//!   `mov rax, imm64; xor edx, edx; jmp rax`, where the resolver replaces the `imm64` sentinel
//!   with the real destructor address
//! - a cell, 8-byte aligned, holding a virtual table address
//!
//! Offsets handed out are relative to the start of the buffer until the buffer is placed in a
//! section and the offsets are rebased.

use crate::{
    file::writer::Writer,
    records::{RelativeOffset, StorageKind, Symbol},
    utils::to_u32,
    Error, Result,
};

/// Placeholder address in an unresolved thunk.
pub const SENTINEL: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// Size of the runtime state slot at the start of the buffer.
pub const RUNTIME_SLOT_SIZE: usize = 8;

/// Alignment of a thunk.
pub const THUNK_ALIGNMENT: usize = 16;

/// Alignment of a cell.
pub const CELL_ALIGNMENT: usize = 8;

/// Padding between thunks; decodes as `nop`.
const THUNK_PADDING: u8 = 0x90;

/// Build the machine code of one thunk.
#[must_use]
pub fn thunk_code(address: u64) -> [u8; 14] {
    let mut code = [0u8; 14];
    // mov rax, imm64
    code[0] = 0x48;
    code[1] = 0xB8;
    code[2..10].copy_from_slice(&address.to_le_bytes());
    // xor edx, edx
    code[10] = 0x31;
    code[11] = 0xD2;
    // jmp rax
    code[12] = 0xFF;
    code[13] = 0xE0;
    code
}

/// Appends thunks and cells to a storage buffer.
#[derive(Debug)]
pub struct StorageAllocator {
    writer: Writer,
    offsets: Vec<(usize, RelativeOffset)>,
}

impl Default for StorageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAllocator {
    /// A buffer holding only the zeroed runtime state slot.
    #[must_use]
    pub fn new() -> Self {
        let mut writer = Writer::new();
        writer.write_le(0u64);

        StorageAllocator {
            writer,
            offsets: Vec::new(),
        }
    }

    /// Append a thunk and return its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the buffer outgrows a 32-bit offset.
    pub fn allocate_thunk(&mut self) -> Result<RelativeOffset> {
        self.writer.align(THUNK_ALIGNMENT, THUNK_PADDING);
        let offset = RelativeOffset(to_u32(self.writer.pos())?);
        self.writer.write_bytes(&thunk_code(SENTINEL));
        Ok(offset)
    }

    /// Append a cell and return its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the buffer outgrows a 32-bit offset.
    pub fn allocate_cell(&mut self) -> Result<RelativeOffset> {
        self.writer.align(CELL_ALIGNMENT, 0);
        let offset = RelativeOffset(to_u32(self.writer.pos())?);
        self.writer.write_le(0u64);
        Ok(offset)
    }

    /// Allocate the storage `symbols[index]` needs and remember which symbol it belongs to.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidSymbol`] if the symbol needs no storage.
    pub fn allocate_for(&mut self, index: usize, symbol: &Symbol) -> Result<RelativeOffset> {
        let offset = match symbol.storage_kind() {
            Some(StorageKind::Thunk) => self.allocate_thunk()?,
            Some(StorageKind::Cell) => self.allocate_cell()?,
            None => {
                return Err(Error::InvalidSymbol {
                    name: symbol.name.clone(),
                    reason: "symbol needs no storage".to_string(),
                })
            }
        };

        log::debug!(
            "Allocated {:?} storage for {} at {}",
            symbol.storage_kind(),
            symbol.name,
            offset
        );
        self.offsets.push((index, offset));
        Ok(offset)
    }

    /// Current size of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writer.pos()
    }

    /// Always `false`; the runtime slot is allocated up front.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    /// Finish the buffer.
    #[must_use]
    pub fn finish(self) -> StorageLayout {
        StorageLayout {
            bytes: self.writer.into_inner(),
            offsets: self.offsets,
        }
    }
}

/// A finished storage buffer and the allocations made for symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Contents of the storage section
    pub bytes: Vec<u8>,
    /// `(symbol index, offset)` for every symbol allocation, in allocation order
    pub offsets: Vec<(usize, RelativeOffset)>,
}
