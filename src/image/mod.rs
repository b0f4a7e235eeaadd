//! A mutable PE32+ image.
//!
//! [`PeImage`] owns a copy of the image bytes and the decoded section table. It is created from
//! a validated [`crate::File`] and supports exactly the edits patching needs: appending and
//! removing sections and rewriting data directories. Header fields that depend on the section
//! layout (`NumberOfSections`, `SizeOfImage`, `SizeOfInitializedData`, `SizeOfCode`) are kept in
//! sync by every edit.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modtweak::image::{PeImage, SectionFlags};
//! use std::path::Path;
//!
//! let mut image = PeImage::load(Path::new("Mod.dll"))?;
//! let rva = image.append_section(".extra", SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ, &[1, 2, 3])?;
//! assert_eq!(image.read_at_rva(rva, 3)?, &[1, 2, 3]);
//! let bytes = image.into_bytes();
//! # Ok::<(), modtweak::Error>(())
//! ```

pub mod section;

use std::path::Path;

pub use goblin::pe::data_directories::DataDirectoryType;
pub use section::{SectionFlags, SectionHeader, SECTION_HEADER_SIZE};

use crate::{
    file::{
        io::{read_le_at, write_le_at},
        parser::Parser,
        File,
    },
    records::{DataDirectory, Rva},
    utils::{align_to, to_u32},
    Error, Result,
};

/// Size of the COFF file header following the `PE\0\0` signature.
const COFF_HEADER_SIZE: usize = 20;

// Offsets inside the COFF header.
const COFF_NUMBER_OF_SECTIONS: usize = 2;
const COFF_SIZE_OF_OPTIONAL_HEADER: usize = 16;

// Offsets inside the PE32+ optional header.
const OPT_SIZE_OF_CODE: usize = 4;
const OPT_SIZE_OF_INITIALIZED_DATA: usize = 8;
const OPT_SECTION_ALIGNMENT: usize = 32;
const OPT_FILE_ALIGNMENT: usize = 36;
const OPT_SIZE_OF_IMAGE: usize = 56;
const OPT_SIZE_OF_HEADERS: usize = 60;
const OPT_NUMBER_OF_RVA_AND_SIZES: usize = 108;
const OPT_DATA_DIRECTORIES: usize = 112;

/// An owned, editable PE32+ image.
#[derive(Debug, Clone)]
pub struct PeImage {
    data: Vec<u8>,
    coff_offset: usize,
    optional_offset: usize,
    section_table_offset: usize,
    sections: Vec<SectionHeader>,
}

impl PeImage {
    /// Load and validate the image at `path`.
    ///
    /// # Errors
    /// See [`File::from_file`].
    pub fn load(path: &Path) -> Result<Self> {
        Self::new(&File::from_file(path)?)
    }

    /// Validate and take ownership of an image buffer.
    ///
    /// # Errors
    /// See [`File::from_mem`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::new(&File::from_mem(data)?)
    }

    /// Copy a loaded image into an editable one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the section table cannot be read.
    pub fn new(file: &File) -> Result<Self> {
        let data = file.data().to_vec();
        let coff_offset = file.pe_header_offset() + 4;
        let optional_offset = coff_offset + COFF_HEADER_SIZE;
        let section_table_offset = optional_offset + usize::from(file.size_of_optional_header());

        if usize::from(file.size_of_optional_header()) < OPT_DATA_DIRECTORIES {
            return Err(malformed_error!(
                "Optional header too small - {}",
                file.size_of_optional_header()
            ));
        }

        let mut image = PeImage {
            data,
            coff_offset,
            optional_offset,
            section_table_offset,
            sections: Vec::new(),
        };

        let count = image.read_u16(coff_offset + COFF_NUMBER_OF_SECTIONS)?;
        for index in 0..usize::from(count) {
            let offset = section_table_offset + index * SECTION_HEADER_SIZE;
            let header = SectionHeader::read(&image.data, offset)
                .map_err(|_| malformed_error!("Section header {index} exceeds the image"))?;
            image.sections.push(header);
        }

        Ok(image)
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the image has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the image and return its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// The section table in file order.
    #[must_use]
    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// The first section named `name`.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// `SectionAlignment` from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn section_alignment(&self) -> Result<u32> {
        self.read_u32(self.optional_offset + OPT_SECTION_ALIGNMENT)
    }

    /// `FileAlignment` from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn file_alignment(&self) -> Result<u32> {
        self.read_u32(self.optional_offset + OPT_FILE_ALIGNMENT)
    }

    /// `SizeOfImage` from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn size_of_image(&self) -> Result<u32> {
        self.read_u32(self.optional_offset + OPT_SIZE_OF_IMAGE)
    }

    /// `SizeOfInitializedData` from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn size_of_initialized_data(&self) -> Result<u32> {
        self.read_u32(self.optional_offset + OPT_SIZE_OF_INITIALIZED_DATA)
    }

    fn size_of_headers(&self) -> Result<u32> {
        self.read_u32(self.optional_offset + OPT_SIZE_OF_HEADERS)
    }

    /// A data directory entry; entries beyond `NumberOfRvaAndSizes` read as empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn data_directory(&self, dir_type: DataDirectoryType) -> Result<DataDirectory> {
        let Some(offset) = self.data_directory_offset(dir_type)? else {
            return Ok(DataDirectory::default());
        };

        Ok(DataDirectory {
            rva: Rva(self.read_u32(offset)?),
            size: self.read_u32(offset + 4)?,
        })
    }

    /// Overwrite a data directory entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the image declares fewer directories than
    /// `dir_type` needs.
    pub fn set_data_directory(
        &mut self,
        dir_type: DataDirectoryType,
        directory: DataDirectory,
    ) -> Result<()> {
        let Some(offset) = self.data_directory_offset(dir_type)? else {
            return Err(malformed_error!(
                "Image has no slot for data directory {:?}",
                dir_type
            ));
        };

        self.write_u32(offset, directory.rva.value())?;
        self.write_u32(offset + 4, directory.size)
    }

    fn data_directory_offset(&self, dir_type: DataDirectoryType) -> Result<Option<usize>> {
        let index = dir_type as usize;
        let count = self.read_u32(self.optional_offset + OPT_NUMBER_OF_RVA_AND_SIZES)? as usize;
        let offset = self.optional_offset + OPT_DATA_DIRECTORIES + index * 8;

        if index >= count || offset + 8 > self.section_table_offset {
            return Ok(None);
        }

        Ok(Some(offset))
    }

    /// Translate an RVA into a file offset.
    ///
    /// RVAs inside the headers map to themselves.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the RVA has no backing bytes in the file.
    pub fn rva_to_offset(&self, rva: Rva) -> Result<usize> {
        let (offset, _) = self.file_range(rva)?;
        Ok(offset)
    }

    /// Start offset and end offset of the file bytes backing `rva`.
    fn file_range(&self, rva: Rva) -> Result<(usize, usize)> {
        if let Some(section) = self.sections.iter().find(|section| section.contains_rva(rva)) {
            let delta = rva.value() - section.virtual_address.value();
            if delta >= section.size_of_raw_data {
                return Err(Error::OutOfBounds);
            }

            let start = section.pointer_to_raw_data as usize;
            let end = (start + section.size_of_raw_data as usize).min(self.data.len());
            let offset = start + delta as usize;
            if offset >= end {
                return Err(Error::OutOfBounds);
            }

            return Ok((offset, end));
        }

        let headers = (self.size_of_headers()? as usize).min(self.data.len());
        let offset = rva.value() as usize;
        if offset < headers {
            return Ok((offset, headers));
        }

        Err(Error::OutOfBounds)
    }

    /// Borrow `len` bytes at `rva`; the range must not cross the end of its section.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not backed by file data.
    pub fn read_at_rva(&self, rva: Rva, len: usize) -> Result<&[u8]> {
        let (offset, end) = self.file_range(rva)?;
        if len > end - offset {
            return Err(Error::OutOfBounds);
        }

        Ok(&self.data[offset..offset + len])
    }

    /// Overwrite bytes at `rva`; the range must not cross the end of its section.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not backed by file data.
    pub fn write_at_rva(&mut self, rva: Rva, bytes: &[u8]) -> Result<()> {
        let (offset, end) = self.file_range(rva)?;
        if bytes.len() > end - offset {
            return Err(Error::OutOfBounds);
        }

        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// A parser over the bytes from `rva` to the end of its section.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the RVA is not backed by file data.
    pub fn parser_at(&self, rva: Rva) -> Result<Parser<'_>> {
        let (offset, end) = self.file_range(rva)?;
        Ok(Parser::new(&self.data[offset..end]))
    }

    /// Append a section holding `bytes` after the last section.
    ///
    /// The virtual address is aligned to `SectionAlignment` and the raw data, placed at the end
    /// of the file, to `FileAlignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoSectionHeaderSpace`] if the headers cannot hold another section
    /// table entry, or [`crate::Error::Malformed`] for empty contents or a layout that overflows.
    pub fn append_section(&mut self, name: &str, flags: SectionFlags, bytes: &[u8]) -> Result<Rva> {
        if bytes.is_empty() {
            return Err(malformed_error!("Section {name} has no contents"));
        }

        let header_offset = self.section_table_offset + self.sections.len() * SECTION_HEADER_SIZE;
        let header_room = self
            .sections
            .iter()
            .map(|section| section.pointer_to_raw_data as usize)
            .filter(|&pointer| pointer != 0)
            .fold(self.size_of_headers()? as usize, usize::min);
        if header_offset + SECTION_HEADER_SIZE > header_room {
            return Err(Error::NoSectionHeaderSpace {
                needed: header_offset + SECTION_HEADER_SIZE - header_room,
            });
        }

        let section_alignment = self.section_alignment()?;
        let file_alignment = self.file_alignment()?;

        let virtual_end = self.virtual_end()?;
        let virtual_address = align_to(virtual_end, section_alignment)?;
        let virtual_size = to_u32(bytes.len())?;
        let size_of_raw_data = align_to(virtual_size, file_alignment)?;
        let pointer_to_raw_data = align_to(to_u32(self.data.len())?, file_alignment)?;

        let mut header = SectionHeader::new(name, flags);
        header.virtual_address = Rva(virtual_address);
        header.virtual_size = virtual_size;
        header.size_of_raw_data = size_of_raw_data;
        header.pointer_to_raw_data = pointer_to_raw_data;

        let size_of_image = align_to(
            virtual_address
                .checked_add(virtual_size)
                .ok_or_else(|| malformed_error!("Section {name} exceeds the address space"))?,
            section_alignment,
        )?;

        self.data.resize(pointer_to_raw_data as usize, 0);
        self.data.extend_from_slice(bytes);
        self.data
            .resize((pointer_to_raw_data + size_of_raw_data) as usize, 0);
        header.write(&mut self.data, header_offset)?;

        self.sections.push(header);
        self.write_section_count()?;
        self.write_u32(self.optional_offset + OPT_SIZE_OF_IMAGE, size_of_image)?;
        self.adjust_size_fields(flags, size_of_raw_data, true)?;

        Ok(Rva(virtual_address))
    }

    /// Remove the last section named `name` and return its header.
    ///
    /// Raw data at the end of the file is truncated; raw data elsewhere is zeroed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no such section exists.
    pub fn remove_section(&mut self, name: &str) -> Result<SectionHeader> {
        let Some(index) = self
            .sections
            .iter()
            .rposition(|section| section.name() == name)
        else {
            return Err(malformed_error!("Section {name} not found"));
        };

        let removed = self.sections.remove(index);

        let start = (removed.pointer_to_raw_data as usize).min(self.data.len());
        let end = (start + removed.size_of_raw_data as usize).min(self.data.len());
        if end == self.data.len() {
            self.data.truncate(start);
        } else {
            self.data[start..end].fill(0);
        }

        let sections = std::mem::take(&mut self.sections);
        for (position, section) in sections.iter().enumerate() {
            section.write(
                &mut self.data,
                self.section_table_offset + position * SECTION_HEADER_SIZE,
            )?;
        }
        let stale = self.section_table_offset + sections.len() * SECTION_HEADER_SIZE;
        self.data[stale..stale + SECTION_HEADER_SIZE].fill(0);
        self.sections = sections;

        let size_of_image = align_to(self.virtual_end()?, self.section_alignment()?)?;
        self.write_section_count()?;
        self.write_u32(self.optional_offset + OPT_SIZE_OF_IMAGE, size_of_image)?;
        self.adjust_size_fields(removed.flags(), removed.size_of_raw_data, false)?;

        Ok(removed)
    }

    /// First RVA after every section, or the end of the headers if there are none.
    fn virtual_end(&self) -> Result<u32> {
        let mut end = align_to(self.size_of_headers()?, self.section_alignment()?)?;
        for section in &self.sections {
            let section_end = section
                .virtual_address
                .value()
                .checked_add(section.loaded_size())
                .ok_or_else(|| malformed_error!("Section {} overflows", section.name()))?;
            end = end.max(section_end);
        }

        Ok(end)
    }

    fn adjust_size_fields(&mut self, flags: SectionFlags, size: u32, grow: bool) -> Result<()> {
        let fields = [
            (SectionFlags::CNT_CODE, OPT_SIZE_OF_CODE),
            (SectionFlags::CNT_INITIALIZED_DATA, OPT_SIZE_OF_INITIALIZED_DATA),
        ];

        for (flag, field) in fields {
            if flags.contains(flag) {
                let offset = self.optional_offset + field;
                let current = self.read_u32(offset)?;
                let value = if grow {
                    current.saturating_add(size)
                } else {
                    current.saturating_sub(size)
                };
                self.write_u32(offset, value)?;
            }
        }

        Ok(())
    }

    fn write_section_count(&mut self) -> Result<()> {
        let count = u16::try_from(self.sections.len())
            .map_err(|_| malformed_error!("Too many sections - {}", self.sections.len()))?;
        let mut offset = self.coff_offset + COFF_NUMBER_OF_SECTIONS;
        write_le_at(&mut self.data, &mut offset, count)
    }

    fn read_u16(&self, offset: usize) -> Result<u16> {
        let mut offset = offset;
        read_le_at(&self.data, &mut offset)
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut offset = offset;
        read_le_at(&self.data, &mut offset)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let mut offset = offset;
        write_le_at(&mut self.data, &mut offset, value)
    }

    /// Declared size of the optional header, as stored in the COFF header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header is truncated.
    pub fn size_of_optional_header(&self) -> Result<u16> {
        self.read_u16(self.coff_offset + COFF_SIZE_OF_OPTIONAL_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::PeBuilder;

    fn rw_flags() -> SectionFlags {
        SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ | SectionFlags::MEM_WRITE
    }

    #[test]
    fn reads_layout() {
        let image = PeImage::from_bytes(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .build(),
        )
        .unwrap();

        assert_eq!(image.section_alignment().unwrap(), 0x1000);
        assert_eq!(image.file_alignment().unwrap(), 0x200);
        assert_eq!(image.size_of_optional_header().unwrap(), 0xF0);
        assert_eq!(image.sections().len(), 2);
        assert!(image.section(".text").is_some());

        let imports = image.data_directory(DataDirectoryType::ImportTable).unwrap();
        assert!(!imports.is_empty());
        assert_eq!(
            image.rva_to_offset(imports.rva).unwrap(),
            image.section(".idata").unwrap().pointer_to_raw_data as usize
                + (imports.rva.value() - image.section(".idata").unwrap().virtual_address.value())
                    as usize
        );
    }

    #[test]
    fn append_section_layout() {
        let mut image = PeImage::from_bytes(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .build(),
        )
        .unwrap();
        let original_len = image.len();
        let initialized = image.size_of_initialized_data().unwrap();

        let payload = [0xAB; 0x30];
        let rva = image.append_section(".test", rw_flags(), &payload).unwrap();

        let last = image.sections().last().unwrap().clone();
        let previous = &image.sections()[image.sections().len() - 2];
        assert_eq!(last.name(), ".test");
        assert_eq!(rva, last.virtual_address);
        assert_eq!(rva.value() % 0x1000, 0);
        assert!(rva.value() >= previous.virtual_address.value() + previous.loaded_size());
        assert_eq!(last.pointer_to_raw_data % 0x200, 0);
        assert_eq!(last.size_of_raw_data, 0x200);
        assert_eq!(last.virtual_size, 0x30);
        assert_eq!(image.len(), original_len + 0x200);
        assert_eq!(image.size_of_image().unwrap(), rva.value() + 0x1000);
        assert_eq!(image.size_of_initialized_data().unwrap(), initialized + 0x200);
        assert_eq!(image.read_at_rva(rva, 0x30).unwrap(), &payload);
        assert!(image.read_at_rva(rva, 0x201).is_err());

        // Goblin agrees with the updated headers.
        let reparsed = File::from_mem(image.clone().into_bytes()).unwrap();
        assert_eq!(reparsed.sections().count(), 3);
    }

    #[test]
    fn remove_section_restores_layout() {
        let original = PeBuilder::new()
            .import("KERNEL32.dll", &["ExitProcess"])
            .build();
        let mut image = PeImage::from_bytes(original.clone()).unwrap();

        image.append_section(".one", rw_flags(), &[1; 8]).unwrap();
        image.append_section(".two", rw_flags(), &[2; 8]).unwrap();

        let removed = image.remove_section(".two").unwrap();
        assert_eq!(removed.name(), ".two");
        image.remove_section(".one").unwrap();

        assert_eq!(image.into_bytes(), original);
    }

    #[test]
    fn remove_missing_section() {
        let mut image = PeImage::from_bytes(PeBuilder::new().build()).unwrap();
        assert!(image.remove_section(".nope").is_err());
    }

    #[test]
    fn header_space_exhausted() {
        let mut image = PeImage::from_bytes(PeBuilder::new().build()).unwrap();

        let mut appended = 0;
        let error = loop {
            match image.append_section(".x", rw_flags(), &[0; 4]) {
                Ok(_) => appended += 1,
                Err(error) => break error,
            }
        };

        assert!(appended > 0);
        assert!(matches!(error, Error::NoSectionHeaderSpace { .. }));
    }

    #[test]
    fn data_directory_roundtrip() {
        let mut image = PeImage::from_bytes(PeBuilder::new().build()).unwrap();
        assert!(image
            .data_directory(DataDirectoryType::ImportTable)
            .unwrap()
            .is_empty());

        let directory = DataDirectory {
            rva: Rva(0x5000),
            size: 40,
        };
        image
            .set_data_directory(DataDirectoryType::ImportTable, directory)
            .unwrap();
        assert_eq!(
            image.data_directory(DataDirectoryType::ImportTable).unwrap(),
            directory
        );
    }

    #[test]
    fn unmapped_rva() {
        let image = PeImage::from_bytes(PeBuilder::new().build()).unwrap();
        assert!(matches!(
            image.rva_to_offset(Rva(0x0FFF_0000)),
            Err(Error::OutOfBounds)
        ));
        // Header bytes are addressable by RVA.
        assert_eq!(image.read_at_rva(Rva(0), 2).unwrap(), b"MZ");
    }
}
