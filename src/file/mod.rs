//! Loading and low-level access to PE32+ images.
//!
//! This module contains the read-only image loader [`crate::File`] together with the byte level
//! primitives the rest of the crate is built on:
//!
//! - [`crate::file::io`] - bounds-checked little-endian reads and writes
//! - [`crate::file::parser`] - a cursor over borrowed bytes
//! - [`crate::file::writer`] - a growable little-endian sink
//! - [`crate::file::output`] - a memory-mapped output file that cleans up after itself
//!
//! A [`File`] is backed either by a memory mapping of a file on disk or by an owned buffer, and
//! validates on load that the data is a PE32+ image with an optional header. It is the entry
//! point for turning bytes into a mutable [`crate::PeImage`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use modtweak::File;
//! use goblin::pe::data_directories::DataDirectoryType;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("Mod.dll"))?;
//! println!("image base 0x{:X}", file.imagebase());
//! if let Some((rva, size)) = file.get_data_directory(DataDirectoryType::ImportTable) {
//!     println!("imports at 0x{rva:X} ({size} bytes)");
//! }
//! for library in file.libraries() {
//!     println!("imports {library}");
//! }
//! # Ok::<(), modtweak::Error>(())
//! ```

pub mod io;
pub mod output;
pub mod parser;
pub mod writer;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr, NotSupported},
    Result,
};
use goblin::pe::{data_directories::DataDirectoryType, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Storage that a [`File`] reads its bytes from.
pub trait Backend: Send + Sync {
    /// Borrow `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// The complete data.
    fn data(&self) -> &[u8];

    /// Length of the data in bytes.
    fn len(&self) -> usize;
}

/// A parsed, read-only PE32+ image.
///
/// The goblin view of the headers borrows directly from the backing data, so loading an image
/// never copies it.
#[self_referencing]
pub struct File {
    /// The backing bytes
    data: Box<dyn Backend>,
    /// Parsed view of the headers
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Map and parse the image at `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, [`crate::Error::Empty`]
    /// for an empty file, [`crate::Error::GoblinErr`] if it is not a PE image, and
    /// [`crate::Error::NotSupported`] if it is not PE32+.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Parse an image from an owned buffer.
    ///
    /// # Errors
    /// See [`File::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            let data = data.as_ref();
            let pe = PE::parse(data.data()).map_err(GoblinErr)?;

            if pe.header.optional_header.is_none() {
                return Err(malformed_error!("File does not have an OptionalHeader"));
            }

            // Import slots are 8 bytes wide only in PE32+ images.
            if !pe.is_64 {
                return Err(NotSupported);
            }

            Ok(pe)
        })
    }

    /// Length of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the image has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The complete raw image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Borrow `len` bytes at file offset `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Preferred load address.
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// File offset of the `PE\0\0` signature.
    #[must_use]
    pub fn pe_header_offset(&self) -> usize {
        self.with_pe(|pe| pe.header.dos_header.pe_pointer as usize)
    }

    /// Declared size of the optional header.
    #[must_use]
    pub fn size_of_optional_header(&self) -> u16 {
        self.with_pe(|pe| pe.header.coff_header.size_of_optional_header)
    }

    /// The section table as parsed on load.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// `(rva, size)` of a data directory, if present and non-empty.
    #[must_use]
    pub fn get_data_directory(&self, dir_type: DataDirectoryType) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()?
                .data_directories
                .dirs()
                .find(|(directory_type, directory)| {
                    *directory_type == dir_type
                        && directory.virtual_address != 0
                        && directory.size != 0
                })
                .map(|(_, directory)| (directory.virtual_address, directory.size))
        })
    }

    /// Names of all imported modules, in import directory order.
    #[must_use]
    pub fn libraries(&self) -> Vec<String> {
        self.with_pe(|pe| pe.libraries.iter().map(ToString::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::PeBuilder;

    #[test]
    fn load_pe32_plus() {
        let bytes = PeBuilder::new()
            .import("KERNEL32.dll", &["ExitProcess"])
            .build();
        let file = File::from_mem(bytes).unwrap();

        assert_eq!(file.pe_header_offset(), 0x80);
        assert_eq!(file.imagebase(), 0x1_4000_0000);
        assert_eq!(file.sections().count(), 2);
        assert!(file.get_data_directory(DataDirectoryType::ImportTable).is_some());
        assert_eq!(file.libraries(), vec!["KERNEL32.dll".to_string()]);
    }

    #[test]
    fn load_without_imports() {
        let file = File::from_mem(PeBuilder::new().build()).unwrap();
        assert!(file.get_data_directory(DataDirectoryType::ImportTable).is_none());
        assert!(file.libraries().is_empty());
    }

    #[test]
    fn reject_empty_and_garbage() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Empty)));
        assert!(matches!(
            File::from_mem(vec![0xCC; 0x400]),
            Err(GoblinErr(_))
        ));
    }

    #[test]
    fn reject_pe32() {
        let bytes = PeBuilder::new().pe32().build();
        assert!(matches!(File::from_mem(bytes), Err(NotSupported)));
    }
}
