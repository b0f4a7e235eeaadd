//! Section table entries.

use std::fmt;

use bitflags::bitflags;

use crate::{
    file::io::{read_le_at, write_le_at},
    records::Rva,
    Result,
};

/// Size of one section table entry.
pub const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Section characteristics (`IMAGE_SCN_*`)
    pub struct SectionFlags: u32 {
        /// The section contains executable code
        const CNT_CODE = 0x0000_0020;
        /// The section contains initialized data
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// The section contains uninitialized data
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// The section can be discarded as needed
        const MEM_DISCARDABLE = 0x0200_0000;
        /// The section can be shared in memory
        const MEM_SHARED = 0x1000_0000;
        /// The section can be executed as code
        const MEM_EXECUTE = 0x2000_0000;
        /// The section can be read
        const MEM_READ = 0x4000_0000;
        /// The section can be written to
        const MEM_WRITE = 0x8000_0000;
    }
}

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Raw 8-byte name, NUL padded
    pub name: [u8; 8],
    /// Size of the section when loaded
    pub virtual_size: u32,
    /// Address of the section when loaded
    pub virtual_address: Rva,
    /// Size of the section's data on disk
    pub size_of_raw_data: u32,
    /// File offset of the section's data
    pub pointer_to_raw_data: u32,
    /// File offset of COFF relocations, zero for images
    pub pointer_to_relocations: u32,
    /// File offset of COFF line numbers, zero for images
    pub pointer_to_linenumbers: u32,
    /// Number of COFF relocations
    pub number_of_relocations: u16,
    /// Number of COFF line numbers
    pub number_of_linenumbers: u16,
    /// Section characteristics; unknown bits are preserved
    pub characteristics: u32,
}

impl SectionHeader {
    /// A header with the given name and flags and no placement yet.
    ///
    /// Names longer than 8 bytes are truncated.
    #[must_use]
    pub fn new(name: &str, flags: SectionFlags) -> Self {
        let mut raw = [0u8; 8];
        let bytes = name.as_bytes();
        let len = bytes.len().min(raw.len());
        raw[..len].copy_from_slice(&bytes[..len]);

        SectionHeader {
            name: raw,
            virtual_size: 0,
            virtual_address: Rva(0),
            size_of_raw_data: 0,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: flags.bits(),
        }
    }

    /// Decode an entry at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 40 bytes remain.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let mut offset = offset;
        let mut name = [0u8; 8];
        for byte in &mut name {
            *byte = read_le_at::<u8>(data, &mut offset)?;
        }

        Ok(SectionHeader {
            name,
            virtual_size: read_le_at(data, &mut offset)?,
            virtual_address: Rva(read_le_at(data, &mut offset)?),
            size_of_raw_data: read_le_at(data, &mut offset)?,
            pointer_to_raw_data: read_le_at(data, &mut offset)?,
            pointer_to_relocations: read_le_at(data, &mut offset)?,
            pointer_to_linenumbers: read_le_at(data, &mut offset)?,
            number_of_relocations: read_le_at(data, &mut offset)?,
            number_of_linenumbers: read_le_at(data, &mut offset)?,
            characteristics: read_le_at(data, &mut offset)?,
        })
    }

    /// Encode the entry at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 40 bytes remain.
    pub fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        let mut offset = offset;
        for byte in self.name {
            write_le_at(data, &mut offset, byte)?;
        }
        write_le_at(data, &mut offset, self.virtual_size)?;
        write_le_at(data, &mut offset, self.virtual_address.value())?;
        write_le_at(data, &mut offset, self.size_of_raw_data)?;
        write_le_at(data, &mut offset, self.pointer_to_raw_data)?;
        write_le_at(data, &mut offset, self.pointer_to_relocations)?;
        write_le_at(data, &mut offset, self.pointer_to_linenumbers)?;
        write_le_at(data, &mut offset, self.number_of_relocations)?;
        write_le_at(data, &mut offset, self.number_of_linenumbers)?;
        write_le_at(data, &mut offset, self.characteristics)?;
        Ok(())
    }

    /// The name with NUL padding removed; invalid UTF-8 is replaced.
    #[must_use]
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// The known characteristic flags.
    #[must_use]
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.characteristics)
    }

    /// Bytes the section spans once loaded; images may leave `virtual_size` zero.
    #[must_use]
    pub fn loaded_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }

    /// `true` if `rva` lies inside the loaded section.
    #[must_use]
    pub fn contains_rva(&self, rva: Rva) -> bool {
        let start = u64::from(self.virtual_address.value());
        let end = start + u64::from(self.loaded_size());
        (start..end).contains(&u64::from(rva.value()))
    }
}

impl fmt::Display for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} va={} vsize=0x{:X} raw=0x{:X}+0x{:X}",
            self.name(),
            self.virtual_address,
            self.virtual_size,
            self.pointer_to_raw_data,
            self.size_of_raw_data
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let mut header = SectionHeader::new(
            ".rtis",
            SectionFlags::CNT_INITIALIZED_DATA
                | SectionFlags::MEM_READ
                | SectionFlags::MEM_WRITE
                | SectionFlags::MEM_EXECUTE,
        );
        header.virtual_size = 0x38;
        header.virtual_address = Rva(0x4000);
        header.size_of_raw_data = 0x200;
        header.pointer_to_raw_data = 0x800;

        let mut data = [0u8; 48];
        header.write(&mut data, 4).unwrap();

        assert_eq!(&data[4..12], b".rtis\0\0\0");
        assert_eq!(&data[40..44], &0xE000_0040u32.to_le_bytes());
        assert_eq!(SectionHeader::read(&data, 4).unwrap(), header);
        assert!(SectionHeader::read(&data, 9).is_err());
    }

    #[test]
    fn names() {
        assert_eq!(SectionHeader::new(".nidt", SectionFlags::MEM_READ).name(), ".nidt");
        assert_eq!(
            SectionHeader::new(".averylongname", SectionFlags::MEM_READ).name(),
            ".averylo"
        );
    }

    #[test]
    fn rva_containment() {
        let mut header = SectionHeader::new(".data", SectionFlags::MEM_READ);
        header.virtual_address = Rva(0x2000);
        header.size_of_raw_data = 0x200;
        assert!(header.contains_rva(Rva(0x21FF)));
        assert!(!header.contains_rva(Rva(0x2200)));

        header.virtual_size = 0x1000;
        assert!(header.contains_rva(Rva(0x2FFF)));
        assert!(!header.contains_rva(Rva(0x1FFF)));
    }

    #[test]
    fn unknown_flags_preserved() {
        let mut header = SectionHeader::new(".tls", SectionFlags::MEM_READ);
        header.characteristics |= 0x0030_0000;
        assert_eq!(header.flags(), SectionFlags::MEM_READ);
        assert_eq!(header.characteristics & 0x0030_0000, 0x0030_0000);
    }
}
