//! Synthetic PE images for unit tests.
//!
//! [`PeBuilder`] produces small but complete PE32+ DLLs that goblin accepts: a `.text` section
//! with a single `ret` and, when imports are added, an `.idata` section with the import
//! directory, lookup tables, address tables and hint/name entries. The headers leave room for
//! additional section table entries.

/// Offset of the `PE\0\0` signature.
pub const PE_OFFSET: usize = 0x80;

/// Image base of every built image.
pub const IMAGE_BASE: u64 = 0x1_4000_0000;

/// RVA of the `.text` section.
pub const TEXT_RVA: u32 = 0x1000;

/// RVA of the `.idata` section.
pub const IDATA_RVA: u32 = 0x2000;

const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x1000;
const HEADERS_SIZE: u32 = 0x400;

/// One entry of an import lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thunk<'a> {
    /// Import by name
    Name(&'a str),
    /// Import by ordinal
    Ordinal(u16),
}

/// Builder for synthetic PE images.
#[derive(Debug, Default)]
pub struct PeBuilder<'a> {
    imports: Vec<(&'a str, Vec<Thunk<'a>>)>,
    pe32: bool,
    tight_headers: bool,
}

impl<'a> PeBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import `names` from `module`.
    pub fn import(mut self, module: &'a str, names: &[&'a str]) -> Self {
        self.imports
            .push((module, names.iter().map(|&name| Thunk::Name(name)).collect()));
        self
    }

    /// Import a mix of named and ordinal entries from `module`.
    pub fn import_thunks(mut self, module: &'a str, thunks: &[Thunk<'a>]) -> Self {
        self.imports.push((module, thunks.to_vec()));
        self
    }

    /// Build a PE32 image instead; imports are ignored.
    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    /// Declare headers that leave no room for further section table entries.
    pub fn tight_headers(mut self) -> Self {
        self.tight_headers = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        if self.pe32 {
            return self.build_pe32();
        }

        let idata = (!self.imports.is_empty()).then(|| self.build_idata());
        let section_count: u16 = if idata.is_some() { 2 } else { 1 };

        let mut out = vec![0u8; HEADERS_SIZE as usize];
        out[0..2].copy_from_slice(b"MZ");
        put_u32(&mut out, 0x3C, PE_OFFSET as u32);
        out[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        put_u16(&mut out, coff, 0x8664);
        put_u16(&mut out, coff + 2, section_count);
        put_u16(&mut out, coff + 16, 0xF0);
        put_u16(&mut out, coff + 18, 0x2022);

        let opt = coff + 20;
        let idata_raw = idata
            .as_ref()
            .map_or(0, |bytes| align(bytes.len() as u32, FILE_ALIGNMENT));
        let size_of_image = match &idata {
            Some(bytes) => align(IDATA_RVA + bytes.len() as u32, SECTION_ALIGNMENT),
            None => TEXT_RVA + SECTION_ALIGNMENT,
        };

        put_u16(&mut out, opt, 0x20B);
        out[opt + 2] = 14;
        put_u32(&mut out, opt + 4, FILE_ALIGNMENT);
        put_u32(&mut out, opt + 8, idata_raw);
        put_u32(&mut out, opt + 16, TEXT_RVA);
        put_u32(&mut out, opt + 20, TEXT_RVA);
        put_u64(&mut out, opt + 24, IMAGE_BASE);
        put_u32(&mut out, opt + 32, SECTION_ALIGNMENT);
        put_u32(&mut out, opt + 36, FILE_ALIGNMENT);
        put_u16(&mut out, opt + 40, 6);
        put_u16(&mut out, opt + 48, 6);
        put_u32(&mut out, opt + 56, size_of_image);
        put_u32(
            &mut out,
            opt + 60,
            if self.tight_headers { 0x200 } else { HEADERS_SIZE },
        );
        put_u16(&mut out, opt + 68, 2);
        put_u64(&mut out, opt + 72, 0x10_0000);
        put_u64(&mut out, opt + 80, 0x1000);
        put_u64(&mut out, opt + 88, 0x10_0000);
        put_u64(&mut out, opt + 96, 0x1000);
        put_u32(&mut out, opt + 108, 16);
        if let Some(bytes) = &idata {
            let descriptors = (self.imports.len() as u32 + 1) * 20;
            debug_assert!(bytes.len() as u32 >= descriptors);
            put_u32(&mut out, opt + 112 + 8, IDATA_RVA);
            put_u32(&mut out, opt + 112 + 12, descriptors);
        }

        let table = opt + 0xF0;
        write_section(&mut out, table, b".text", TEXT_RVA, 1, HEADERS_SIZE, FILE_ALIGNMENT, 0x6000_0020);
        let mut text = vec![0u8; FILE_ALIGNMENT as usize];
        text[0] = 0xC3;
        out.extend_from_slice(&text);

        if let Some(bytes) = idata {
            write_section(
                &mut out,
                table + 40,
                b".idata",
                IDATA_RVA,
                bytes.len() as u32,
                HEADERS_SIZE + FILE_ALIGNMENT,
                idata_raw,
                0xC000_0040,
            );
            let start = out.len();
            out.extend_from_slice(&bytes);
            out.resize(start + idata_raw as usize, 0);
        }

        out
    }

    /// Contents of the `.idata` section, descriptors first.
    fn build_idata(&self) -> Vec<u8> {
        let descriptors = (self.imports.len() + 1) * 20;

        let mut cursor = descriptors;
        let mut tables = Vec::new();
        for (_, thunks) in &self.imports {
            let lookup = cursor;
            cursor += (thunks.len() + 1) * 8;
            let address = cursor;
            cursor += (thunks.len() + 1) * 8;
            tables.push((lookup, address));
        }

        let mut strings = Vec::new();
        for (module, thunks) in &self.imports {
            let name = cursor;
            cursor = align((cursor + module.len() + 1) as u32, 2) as usize;
            let mut hints = Vec::new();
            for thunk in thunks {
                if let Thunk::Name(symbol) = thunk {
                    hints.push(Some(cursor));
                    cursor = align((cursor + 2 + symbol.len() + 1) as u32, 2) as usize;
                } else {
                    hints.push(None);
                }
            }
            strings.push((name, hints));
        }

        let rva = |offset: usize| IDATA_RVA + offset as u32;
        let mut out = vec![0u8; cursor];

        for (index, (module, thunks)) in self.imports.iter().enumerate() {
            let (lookup, address) = tables[index];
            let (name, hints) = &strings[index];

            let descriptor = index * 20;
            put_u32(&mut out, descriptor, rva(lookup));
            put_u32(&mut out, descriptor + 12, rva(*name));
            put_u32(&mut out, descriptor + 16, rva(address));

            out[*name..*name + module.len()].copy_from_slice(module.as_bytes());

            for (position, (thunk, hint)) in thunks.iter().zip(hints).enumerate() {
                let entry = match (thunk, hint) {
                    (Thunk::Name(symbol), Some(hint)) => {
                        put_u16(&mut out, *hint, position as u16);
                        out[hint + 2..hint + 2 + symbol.len()].copy_from_slice(symbol.as_bytes());
                        u64::from(rva(*hint))
                    }
                    (Thunk::Ordinal(ordinal), _) => (1 << 63) | u64::from(*ordinal),
                    (Thunk::Name(_), None) => unreachable!(),
                };
                put_u64(&mut out, lookup + position * 8, entry);
                put_u64(&mut out, address + position * 8, entry);
            }
        }

        out
    }

    fn build_pe32(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADERS_SIZE as usize];
        out[0..2].copy_from_slice(b"MZ");
        put_u32(&mut out, 0x3C, PE_OFFSET as u32);
        out[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        put_u16(&mut out, coff, 0x14C);
        put_u16(&mut out, coff + 2, 1);
        put_u16(&mut out, coff + 16, 0xE0);
        put_u16(&mut out, coff + 18, 0x2102);

        let opt = coff + 20;
        put_u16(&mut out, opt, 0x10B);
        put_u32(&mut out, opt + 4, FILE_ALIGNMENT);
        put_u32(&mut out, opt + 16, TEXT_RVA);
        put_u32(&mut out, opt + 20, TEXT_RVA);
        put_u32(&mut out, opt + 28, 0x1000_0000);
        put_u32(&mut out, opt + 32, SECTION_ALIGNMENT);
        put_u32(&mut out, opt + 36, FILE_ALIGNMENT);
        put_u16(&mut out, opt + 40, 6);
        put_u16(&mut out, opt + 48, 6);
        put_u32(&mut out, opt + 56, TEXT_RVA + SECTION_ALIGNMENT);
        put_u32(&mut out, opt + 60, HEADERS_SIZE);
        put_u16(&mut out, opt + 68, 2);
        put_u32(&mut out, opt + 72, 0x10_0000);
        put_u32(&mut out, opt + 76, 0x1000);
        put_u32(&mut out, opt + 80, 0x10_0000);
        put_u32(&mut out, opt + 84, 0x1000);
        put_u32(&mut out, opt + 92, 16);

        write_section(&mut out, opt + 0xE0, b".text", TEXT_RVA, 1, HEADERS_SIZE, FILE_ALIGNMENT, 0x6000_0020);
        let mut text = vec![0u8; FILE_ALIGNMENT as usize];
        text[0] = 0xC3;
        out.extend_from_slice(&text);

        out
    }
}

#[allow(clippy::too_many_arguments)]
fn write_section(
    out: &mut [u8],
    offset: usize,
    name: &[u8],
    virtual_address: u32,
    virtual_size: u32,
    pointer_to_raw_data: u32,
    size_of_raw_data: u32,
    characteristics: u32,
) {
    out[offset..offset + name.len()].copy_from_slice(name);
    put_u32(out, offset + 8, virtual_size);
    put_u32(out, offset + 12, virtual_address);
    put_u32(out, offset + 16, size_of_raw_data);
    put_u32(out, offset + 20, pointer_to_raw_data);
    put_u32(out, offset + 36, characteristics);
}

fn align(value: u32, alignment: u32) -> u32 {
    value.next_multiple_of(alignment)
}

fn put_u16(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut [u8], offset: usize, value: u64) {
    out[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
