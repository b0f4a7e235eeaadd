//! The sections a patch adds to an image.
//!
//! Three sections are appended, always in this order:
//!
//! | Section | Contents                                                       | Characteristics        |
//! |---------|----------------------------------------------------------------|------------------------|
//! | `.rtis` | runtime state slot, thunks and cells                           | data, read/write/execute |
//! | `.rtih` | the [`ImporterHeader`]                                         | data, read             |
//! | `.nidt` | the import descriptors without the removed module, terminated | data, read             |
//!
//! Storage goes first because the header records absolute storage addresses, which are only
//! known once the storage section is placed.

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    image::{DataDirectoryType, PeImage, SectionFlags},
    patch::{
        imports::{ImportDirectory, TargetModule},
        storage::StorageAllocator,
    },
    records::{DataDirectory, ImporterHeader, Rva, Symbol},
    utils::to_u32,
    Result,
};

/// A section added by patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum CustomSection {
    /// The importer header
    #[strum(serialize = ".rtih")]
    Header,
    /// Thunks and cells
    #[strum(serialize = ".rtis")]
    Storage,
    /// The replacement import directory
    #[strum(serialize = ".nidt")]
    ImportDirectory,
}

/// Every custom section, in the order patching appends them.
pub const CUSTOM_SECTIONS: [CustomSection; 3] = [
    CustomSection::Storage,
    CustomSection::Header,
    CustomSection::ImportDirectory,
];

impl CustomSection {
    /// The section name as it appears in the section table.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Characteristics the section is created with.
    #[must_use]
    pub fn flags(self) -> SectionFlags {
        match self {
            CustomSection::Storage => {
                SectionFlags::CNT_INITIALIZED_DATA
                    | SectionFlags::MEM_READ
                    | SectionFlags::MEM_WRITE
                    | SectionFlags::MEM_EXECUTE
            }
            CustomSection::Header | CustomSection::ImportDirectory => {
                SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ
            }
        }
    }

    /// The custom section named `name`, if any.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

/// Where the synthesized sections ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSections {
    /// The header written to `.rtih`, storage addresses filled in
    pub header: ImporterHeader,
    /// Address of `.rtis`
    pub storage: Rva,
    /// Size of the storage contents
    pub storage_size: u32,
    /// Address of `.rtih`
    pub header_rva: Rva,
    /// Size of the serialized header
    pub header_size: u32,
    /// The new import data directory, pointing into `.nidt`
    pub import_directory: DataDirectory,
}

/// Append the storage, header and import directory sections and repoint the import directory.
///
/// `symbols` must already have their import slots assigned. On error the image may be partially
/// modified; callers that need atomicity work on a copy.
///
/// # Errors
/// Returns [`crate::Error::NoSectionHeaderSpace`] if the section table is full, or any error of
/// serializing the header.
pub fn synthesize(
    image: &mut PeImage,
    directory: &ImportDirectory,
    target: &TargetModule,
    mut symbols: Vec<Symbol>,
    import_count: u32,
) -> Result<SynthesizedSections> {
    let mut allocator = StorageAllocator::new();
    for (index, symbol) in symbols.iter().enumerate() {
        if symbol.needs_storage() {
            allocator.allocate_for(index, symbol)?;
        }
    }
    let layout = allocator.finish();
    let storage_size = to_u32(layout.bytes.len())?;

    let storage = image.append_section(
        CustomSection::Storage.name(),
        CustomSection::Storage.flags(),
        &layout.bytes,
    )?;
    log::info!(
        "Generated storage for {} symbols, 0x{storage_size:X} bytes at {storage}",
        layout.offsets.len()
    );

    for (index, offset) in &layout.offsets {
        let rva = offset.rebase(storage)?;
        log::debug!("Storage of {} rebased to {rva}", symbols[*index].name);
        symbols[*index].storage = Some(rva);
    }

    let header = ImporterHeader {
        symbols,
        old_import_directory: directory.location,
        import_count,
    };
    let header_bytes = header.to_bytes()?;
    let header_size = to_u32(header_bytes.len())?;
    let header_rva = image.append_section(
        CustomSection::Header.name(),
        CustomSection::Header.flags(),
        &header_bytes,
    )?;
    log::info!(
        "Embedded {} symbols, 0x{header_size:X} bytes at {header_rva}",
        header.symbols.len()
    );

    let descriptors = directory.without(target.index)?;
    let import_rva = image.append_section(
        CustomSection::ImportDirectory.name(),
        CustomSection::ImportDirectory.flags(),
        &descriptors,
    )?;
    let import_directory = DataDirectory {
        rva: import_rva,
        size: to_u32(descriptors.len())?,
    };
    image.set_data_directory(DataDirectoryType::ImportTable, import_directory)?;

    Ok(SynthesizedSections {
        header,
        storage,
        storage_size,
        header_rva,
        header_size,
        import_directory,
    })
}
