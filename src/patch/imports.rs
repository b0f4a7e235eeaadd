//! Reading the import directory and finding the module to retarget.
//!
//! The import directory is an array of 20-byte descriptors terminated by an all-zero entry.
//! Each descriptor names a module and points at two parallel tables of 8-byte entries: the lookup
//! table, which keeps the import names, and the address table, whose slots the loader fills and
//! code calls through. An entry with the top bit set imports by ordinal; any other non-zero entry
//! is the RVA of a hint/name pair.

use std::collections::HashMap;

use crate::{
    file::{parser::Parser, writer::Writer},
    image::{DataDirectoryType, PeImage},
    records::{DataDirectory, Rva},
    Result,
};

/// Size of one import descriptor.
pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// Size of one lookup or address table entry in a PE32+ image.
pub const THUNK_SIZE: u32 = 8;

/// Lookup table entries with this bit set import by ordinal.
pub const ORDINAL_FLAG: u64 = 1 << 63;

/// Default name prefix of the module whose imports are retargeted.
pub const DEFAULT_TARGET_PREFIX: &str = "Minecraft.Windows";

/// One entry of the import directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImportDescriptor {
    /// RVA of the import lookup table, `0` if the image omits it
    pub original_first_thunk: Rva,
    /// Bound import timestamp
    pub time_date_stamp: u32,
    /// Index of the first forwarder reference
    pub forwarder_chain: u32,
    /// RVA of the NUL-terminated module name
    pub name: Rva,
    /// RVA of the import address table
    pub first_thunk: Rva,
}

impl ImportDescriptor {
    /// `true` for the all-zero entry that terminates the directory.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == ImportDescriptor::default()
    }

    /// Decode a descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 20 bytes remain.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        parser.transactional(|parser| {
            Ok(ImportDescriptor {
                original_first_thunk: Rva(parser.read_le::<u32>()?),
                time_date_stamp: parser.read_le::<u32>()?,
                forwarder_chain: parser.read_le::<u32>()?,
                name: Rva(parser.read_le::<u32>()?),
                first_thunk: Rva(parser.read_le::<u32>()?),
            })
        })
    }

    /// Encode the descriptor.
    pub fn write_to(&self, writer: &mut Writer) {
        writer.write_le(self.original_first_thunk.value());
        writer.write_le(self.time_date_stamp);
        writer.write_le(self.forwarder_chain);
        writer.write_le(self.name.value());
        writer.write_le(self.first_thunk.value());
    }

    /// RVA of the table names are read from.
    fn name_table(&self) -> Rva {
        if self.original_first_thunk.value() == 0 {
            self.first_thunk
        } else {
            self.original_first_thunk
        }
    }
}

/// A decoded import descriptor together with its module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    /// Name of the imported module
    pub module: String,
    /// The raw descriptor
    pub descriptor: ImportDescriptor,
}

/// The import directory of an image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportDirectory {
    /// The data directory entry the descriptors were read from
    pub location: DataDirectory,
    /// Descriptors in directory order, without the terminator
    pub entries: Vec<ImportEntry>,
}

impl ImportDirectory {
    /// Read every descriptor up to the zero terminator.
    ///
    /// The loader ignores the declared directory size, so the walk does too; it only stops early
    /// when the section holding the directory ends. Returns `None` if the image has no import
    /// directory.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the directory or a module name lies outside the
    /// image.
    pub fn read(image: &PeImage) -> Result<Option<Self>> {
        let location = image.data_directory(DataDirectoryType::ImportTable)?;
        if location.is_empty() {
            return Ok(None);
        }

        let mut parser = image.parser_at(location.rva)?;
        let mut entries = Vec::new();

        while parser.remaining() >= IMPORT_DESCRIPTOR_SIZE {
            let descriptor = ImportDescriptor::read(&mut parser)?;
            if descriptor.is_zero() {
                break;
            }

            let module = read_name(&mut image.parser_at(descriptor.name)?)?;
            entries.push(ImportEntry { module, descriptor });
        }

        if entries.len() * IMPORT_DESCRIPTOR_SIZE > location.size as usize {
            log::debug!(
                "Import directory declares {} bytes but holds {} descriptors",
                location.size,
                entries.len()
            );
        }

        Ok(Some(ImportDirectory { location, entries }))
    }

    /// Index of the first module whose name starts with `prefix`, ignoring ASCII case.
    #[must_use]
    pub fn find(&self, prefix: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| matches_prefix(&entry.module, prefix))
    }

    /// The descriptors of every module except `removed`, followed by the zero terminator.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `removed` is not an entry of the directory.
    pub fn without(&self, removed: usize) -> Result<Vec<u8>> {
        if removed >= self.entries.len() {
            return Err(malformed_error!(
                "Import entry {removed} out of range - {}",
                self.entries.len()
            ));
        }

        let mut writer = Writer::with_capacity(self.entries.len() * IMPORT_DESCRIPTOR_SIZE);
        for (index, entry) in self.entries.iter().enumerate() {
            if index != removed {
                entry.descriptor.write_to(&mut writer);
            }
        }
        ImportDescriptor::default().write_to(&mut writer);

        Ok(writer.into_inner())
    }
}

/// Read a NUL-terminated import or module name.
///
/// Names are ASCII; other bytes are replaced rather than rejected, so one odd name does not
/// make the whole directory unreadable.
fn read_name(parser: &mut Parser) -> Result<String> {
    let rest = &parser.data()[parser.pos()..];
    let Some(length) = rest.iter().position(|&b| b == 0) else {
        return Err(crate::Error::OutOfBounds);
    };

    let name = String::from_utf8_lossy(parser.read_bytes(length)?).into_owned();
    parser.advance_by(1)?;
    Ok(name)
}

fn matches_prefix(module: &str, prefix: &str) -> bool {
    module
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|start| start.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// The module whose imports are retargeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetModule {
    /// Index of the module in the import directory
    pub index: usize,
    /// The module's directory entry
    pub entry: ImportEntry,
}

impl TargetModule {
    /// Walk the module's lookup table and map each imported name to its address table slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if a table or hint/name entry lies outside the image.
    pub fn slots(&self, image: &PeImage) -> Result<SlotTable> {
        let descriptor = &self.entry.descriptor;
        let mut lookup = image.parser_at(descriptor.name_table())?;
        let mut table = SlotTable::default();

        loop {
            let entry = lookup.read_le::<u64>()?;
            if entry == 0 {
                break;
            }

            let slot = descriptor
                .first_thunk
                .checked_add(table.count * THUNK_SIZE)?;
            table.count += 1;

            if entry & ORDINAL_FLAG != 0 {
                continue;
            }

            // Bits 31..0 hold the hint/name RVA; the name follows the 2-byte hint.
            let hint_name = Rva((entry & 0x7FFF_FFFF) as u32);
            let mut parser = image.parser_at(hint_name)?;
            parser.advance_by(2)?;
            let name = read_name(&mut parser)?;

            table.insert(name, slot);
        }

        Ok(table)
    }
}

/// Import names of the target module and the address table slot each one occupies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotTable {
    /// `(name, slot)` in lookup table order; a repeated name keeps its first slot
    slots: Vec<(String, Rva)>,
    index: HashMap<String, usize>,
    count: u32,
}

impl SlotTable {
    fn insert(&mut self, name: String, slot: Rva) {
        if self.index.contains_key(&name) {
            return;
        }

        self.index.insert(name.clone(), self.slots.len());
        self.slots.push((name, slot));
    }

    /// Slot of the import named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rva> {
        self.index.get(name).map(|&position| self.slots[position].1)
    }

    /// Number of distinct named imports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if no import was found by name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of lookup table entries, ordinal imports included.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Iterate over `(name, slot)` pairs in lookup table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Rva)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), *slot))
    }
}

/// Find the first imported module whose name starts with `prefix`.
///
/// Returns the directory alongside the match so callers can rebuild it without the module.
/// `None` means the image has no import directory or does not import a matching module.
///
/// # Errors
/// See [`ImportDirectory::read`].
pub fn locate_module(
    image: &PeImage,
    prefix: &str,
) -> Result<Option<(ImportDirectory, TargetModule)>> {
    let Some(directory) = ImportDirectory::read(image)? else {
        return Ok(None);
    };

    let Some(index) = directory.find(prefix) else {
        return Ok(None);
    };

    let entry = directory.entries[index].clone();
    Ok(Some((directory, TargetModule { index, entry })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{PeBuilder, Thunk, IDATA_RVA};

    fn image(builder: PeBuilder) -> PeImage {
        PeImage::from_bytes(builder.build()).unwrap()
    }

    #[test]
    fn read_directory() {
        let image = image(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import("Minecraft.Windows.exe", &["a", "b"]),
        );

        let directory = ImportDirectory::read(&image).unwrap().unwrap();
        assert_eq!(directory.location.rva, Rva(IDATA_RVA));
        assert_eq!(directory.location.size, 60);
        let modules: Vec<_> = directory.entries.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(modules, ["KERNEL32.dll", "Minecraft.Windows.exe"]);
    }

    #[test]
    fn no_import_directory() {
        let image = image(PeBuilder::new());
        assert!(ImportDirectory::read(&image).unwrap().is_none());
        assert!(locate_module(&image, DEFAULT_TARGET_PREFIX).unwrap().is_none());
    }

    #[test]
    fn prefix_match_is_case_insensitive_and_first_wins() {
        let image = image(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import("minecraft.windows.exe", &["first"])
                .import("Minecraft.Windows.Server.exe", &["second"]),
        );

        let (_, target) = locate_module(&image, DEFAULT_TARGET_PREFIX).unwrap().unwrap();
        assert_eq!(target.index, 1);
        assert_eq!(target.entry.module, "minecraft.windows.exe");

        assert!(locate_module(&image, "Minecraft.Windows.exe.extra")
            .unwrap()
            .is_none());
        assert!(locate_module(&image, "USER32").unwrap().is_none());
    }

    #[test]
    fn slots_follow_the_address_table() {
        let image = image(PeBuilder::new().import_thunks(
            "Minecraft.Windows.exe",
            &[
                Thunk::Name("?a@@YAXXZ"),
                Thunk::Ordinal(7),
                Thunk::Name("?b@@YAXXZ"),
                Thunk::Name("?a@@YAXXZ"),
            ],
        ));

        let (_, target) = locate_module(&image, DEFAULT_TARGET_PREFIX).unwrap().unwrap();
        let first_thunk = target.entry.descriptor.first_thunk;
        assert_ne!(first_thunk, target.entry.descriptor.original_first_thunk);

        let slots = target.slots(&image).unwrap();
        assert_eq!(slots.count(), 4);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.get("?a@@YAXXZ"), Some(first_thunk));
        assert_eq!(slots.get("?b@@YAXXZ"), Some(Rva(first_thunk.value() + 16)));
        assert_eq!(slots.get("missing"), None);

        let order: Vec<_> = slots.iter().map(|(name, _)| name).collect();
        assert_eq!(order, ["?a@@YAXXZ", "?b@@YAXXZ"]);
    }

    #[test]
    fn names_fall_back_to_the_address_table() {
        let mut image = image(PeBuilder::new().import("Minecraft.Windows.exe", &["x", "y"]));
        let location = image.data_directory(DataDirectoryType::ImportTable).unwrap();
        image.write_at_rva(location.rva, &[0; 4]).unwrap();

        let (_, target) = locate_module(&image, DEFAULT_TARGET_PREFIX).unwrap().unwrap();
        assert_eq!(target.entry.descriptor.original_first_thunk, Rva(0));

        let slots = target.slots(&image).unwrap();
        assert_eq!(slots.count(), 2);
        assert_eq!(
            slots.get("y"),
            Some(Rva(target.entry.descriptor.first_thunk.value() + 8))
        );
    }

    #[test]
    fn walk_ignores_declared_size() {
        let mut image = image(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import("Minecraft.Windows.exe", &["a"])
                .import("USER32.dll", &["MessageBoxA"]),
        );
        image
            .set_data_directory(
                DataDirectoryType::ImportTable,
                DataDirectory {
                    rva: Rva(IDATA_RVA),
                    size: IMPORT_DESCRIPTOR_SIZE as u32,
                },
            )
            .unwrap();

        let directory = ImportDirectory::read(&image).unwrap().unwrap();
        let modules: Vec<_> = directory.entries.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(modules, ["KERNEL32.dll", "Minecraft.Windows.exe", "USER32.dll"]);
        assert_eq!(directory.find(DEFAULT_TARGET_PREFIX), Some(1));

        // The copy keeps every other module, not only those inside the declared size.
        let bytes = directory.without(1).unwrap();
        assert_eq!(bytes.len(), 3 * IMPORT_DESCRIPTOR_SIZE);
    }

    #[test]
    fn non_ascii_module_name() {
        let mut image = image(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import("Minecraft.Windows.exe", &["a"]),
        );
        let name = ImportDirectory::read(&image).unwrap().unwrap().entries[0]
            .descriptor
            .name;
        image.write_at_rva(name, &[0xFF, 0xFE]).unwrap();

        let (directory, target) = locate_module(&image, DEFAULT_TARGET_PREFIX).unwrap().unwrap();
        assert_eq!(target.index, 1);
        assert!(directory.entries[0].module.ends_with("RNEL32.dll"));
        assert!(directory.entries[0].module.starts_with('\u{FFFD}'));
    }

    #[test]
    fn directory_without_target() {
        let image = image(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import("Minecraft.Windows.exe", &["a"])
                .import("USER32.dll", &["MessageBoxA"]),
        );

        let directory = ImportDirectory::read(&image).unwrap().unwrap();
        let bytes = directory.without(1).unwrap();
        assert_eq!(bytes.len(), 3 * IMPORT_DESCRIPTOR_SIZE);

        let mut parser = Parser::new(&bytes);
        assert_eq!(
            ImportDescriptor::read(&mut parser).unwrap(),
            directory.entries[0].descriptor
        );
        assert_eq!(
            ImportDescriptor::read(&mut parser).unwrap(),
            directory.entries[2].descriptor
        );
        assert!(ImportDescriptor::read(&mut parser).unwrap().is_zero());

        assert!(directory.without(3).is_err());
    }
}
