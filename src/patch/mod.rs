//! Retargeting the imports of a module.
//!
//! Patching removes one imported module from an image and replaces what the loader would have
//! done for it with records a runtime resolver can act on. The [`Patcher`] drives the steps:
//!
//! 1. remove an existing patch, so patching twice replaces the first patch
//! 2. locate the target module in the import directory ([`imports`])
//! 3. map each supplied symbol to the import slot of the same name, and add the virtual tables no
//!    slot refers to
//! 4. allocate thunks and cells for the symbols that need them ([`storage`])
//! 5. append the storage, header and import directory sections ([`sections`])
//!
//! Unpatching reverses this exactly: the original import directory entry is restored from the
//! embedded header and every added section is removed.
//!
//! An image that has no import directory or does not import the target module is left alone;
//! this is reported as [`PatchOutcome::Skipped`] rather than an error.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modtweak::{PatchOptions, PatchOutcome, SymbolDescriptor};
//! use std::path::Path;
//!
//! let symbols = vec![
//!     SymbolDescriptor::function("?tick@Level@@QEAAXXZ").with_signature("40 53 48 83 EC 20"),
//!     SymbolDescriptor::virtual_table("??_7Level@@6B@").with_address(0x4F1A2B0),
//! ];
//!
//! match modtweak::patch_file(Path::new("Mod.dll"), &symbols, &PatchOptions::new())? {
//!     PatchOutcome::Patched(report) => println!("mapped {} imports", report.mapped),
//!     PatchOutcome::Skipped(reason) => println!("nothing to do: {reason}"),
//! }
//! # Ok::<(), modtweak::Error>(())
//! ```

pub mod commit;
pub mod imports;
pub mod sections;
pub mod storage;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
};

use crate::{
    file::parser::Parser,
    image::{DataDirectoryType, PeImage},
    records::{DataDirectory, ImporterHeader, Rva, Symbol, SymbolDescriptor, SymbolRegistry},
    Error, Result,
};
use commit::{commit_image, CommitMode};
use imports::{ImportDirectory, TargetModule, DEFAULT_TARGET_PREFIX};
use sections::{synthesize, CustomSection};

/// What to do with a symbol descriptor that violates the symbol invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolPolicy {
    /// Log the problem and leave the symbol out
    #[default]
    Skip,
    /// Fail the whole patch
    Abort,
}

/// Settings for patching and unpatching.
///
/// # Examples
///
/// ```rust
/// use modtweak::{CommitMode, PatchOptions, SymbolPolicy};
///
/// let options = PatchOptions::new()
///     .with_target_module("Minecraft.Windows")
///     .with_symbol_policy(SymbolPolicy::Abort)
///     .with_output("Patched.dll");
/// assert_eq!(options.commit, CommitMode::To("Patched.dll".into()));
/// ```
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Name prefix of the module to remove, matched ignoring ASCII case
    pub target_module: String,
    /// Handling of invalid symbol descriptors
    pub symbol_policy: SymbolPolicy,
    /// Where file level operations write the result
    pub commit: CommitMode,
    /// Record layouts used to decode embedded headers
    pub registry: SymbolRegistry,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            target_module: DEFAULT_TARGET_PREFIX.to_string(),
            symbol_policy: SymbolPolicy::default(),
            commit: CommitMode::default(),
            registry: SymbolRegistry::builtin(),
        }
    }
}

impl PatchOptions {
    /// Default options: target `Minecraft.Windows`, skip invalid symbols, commit in place.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name prefix of the module to remove.
    #[must_use]
    pub fn with_target_module(mut self, prefix: impl Into<String>) -> Self {
        self.target_module = prefix.into();
        self
    }

    /// Set the handling of invalid symbol descriptors.
    #[must_use]
    pub fn with_symbol_policy(mut self, policy: SymbolPolicy) -> Self {
        self.symbol_policy = policy;
        self
    }

    /// Write results to `path` instead of replacing the input.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.commit = CommitMode::To(path.into());
        self
    }

    /// Replace the input and keep its original at `<input><suffix>`.
    #[must_use]
    pub fn with_backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.commit = CommitMode::InPlace {
            backup_suffix: suffix.into(),
        };
        self
    }

    /// Decode embedded headers with `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: SymbolRegistry) -> Self {
        self.registry = registry;
        self
    }
}

/// Why a patch did not change the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The image has no import directory
    NoImportDirectory,
    /// No imported module matches the target prefix
    ModuleNotImported(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoImportDirectory => write!(f, "image has no import directory"),
            SkipReason::ModuleNotImported(prefix) => {
                write!(f, "image does not import from '{prefix}'")
            }
        }
    }
}

/// Summary of an applied patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Name of the removed module
    pub module: String,
    /// Symbols bound to an import slot
    pub mapped: usize,
    /// Virtual tables embedded without an import slot
    pub shadow: usize,
    /// Symbols that received storage
    pub with_storage: usize,
    /// Supplied symbols that matched no import and were left out
    pub unmatched: Vec<String>,
    /// Symbols rejected by [`SymbolPolicy::Skip`]
    pub rejected: Vec<String>,
    /// Lookup table entries of the removed module, ordinal imports included
    pub import_count: u32,
    /// Number of symbols of the patch this one replaced, if any
    pub replaced: Option<usize>,
    /// Address of the storage section
    pub storage: Rva,
    /// Address of the header section
    pub header: Rva,
    /// The new import data directory
    pub import_directory: DataDirectory,
}

/// Result of [`Patcher::patch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The image was patched
    Patched(PatchReport),
    /// The image was left unchanged
    Skipped(SkipReason),
}

/// Result of [`Patcher::unpatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpatchOutcome {
    /// The patch described by `header` was removed
    Restored {
        /// The header that was embedded in the image
        header: ImporterHeader,
    },
    /// The image carried no patch
    NotPatched,
}

/// Patches and unpatches an owned image.
///
/// Every operation either completes or leaves the image as it was.
#[derive(Debug)]
pub struct Patcher {
    image: PeImage,
    options: PatchOptions,
}

impl Patcher {
    /// Take ownership of `image`.
    #[must_use]
    pub fn new(image: PeImage, options: PatchOptions) -> Self {
        Patcher { image, options }
    }

    /// The image in its current state.
    #[must_use]
    pub fn image(&self) -> &PeImage {
        &self.image
    }

    /// The options this patcher was created with.
    #[must_use]
    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    /// Give up the patcher and return the image.
    #[must_use]
    pub fn into_image(self) -> PeImage {
        self.image
    }

    /// `true` if any section added by patching is present.
    #[must_use]
    pub fn is_patched(&self) -> bool {
        is_patched(&self.image)
    }

    /// Decode the embedded header without modifying the image.
    ///
    /// # Errors
    /// Returns the decoding error if the `.rtih` section does not hold a valid header.
    pub fn header(&self) -> Result<Option<ImporterHeader>> {
        read_header(&self.image, &self.options.registry)
    }

    /// Patch the image with `descriptors`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidSymbol`] for a rejected descriptor under
    /// [`SymbolPolicy::Abort`], [`crate::Error::UnpatchFailed`] if an existing patch cannot be
    /// removed, and any error of reading the imports or synthesizing the sections. The image is
    /// unchanged on error.
    pub fn patch(&mut self, descriptors: &[SymbolDescriptor]) -> Result<PatchOutcome> {
        let (symbols, rejected) = self.convert(descriptors)?;

        let mut image = self.image.clone();
        let previous = if is_patched(&image) {
            match unpatch_image(&mut image, &self.options.registry) {
                Ok(UnpatchOutcome::Restored { header }) => Some(header),
                Ok(UnpatchOutcome::NotPatched) => None,
                Err(error) => return Err(Error::UnpatchFailed(Box::new(error))),
            }
        } else {
            None
        };

        log::debug!("Patching image for '{}'", self.options.target_module);
        let Some(directory) = ImportDirectory::read(&image)? else {
            log::warn!("Image has no import directory, skipping patch");
            return Ok(PatchOutcome::Skipped(SkipReason::NoImportDirectory));
        };
        let Some(index) = directory.find(&self.options.target_module) else {
            log::warn!(
                "Image does not import from '{}', skipping patch",
                self.options.target_module
            );
            return Ok(PatchOutcome::Skipped(SkipReason::ModuleNotImported(
                self.options.target_module.clone(),
            )));
        };
        let target = TargetModule {
            index,
            entry: directory.entries[index].clone(),
        };

        let slots = target.slots(&image)?;
        let (mapped, unmatched) = map_symbols(symbols, &slots);
        let bound = mapped.iter().filter(|symbol| symbol.target.is_some()).count();
        let shadow = mapped.len() - bound;
        let with_storage = mapped.iter().filter(|symbol| symbol.needs_storage()).count();

        if let Some(previous) = &previous {
            log_replaced(previous, &mapped);
        }

        let sections = synthesize(&mut image, &directory, &target, mapped, slots.count())?;
        log::info!(
            "Removed '{}': {bound} imports mapped, {shadow} virtual tables added",
            target.entry.module
        );

        self.image = image;
        Ok(PatchOutcome::Patched(PatchReport {
            module: target.entry.module,
            mapped: bound,
            shadow,
            with_storage,
            unmatched,
            rejected,
            import_count: slots.count(),
            replaced: previous.map(|header| header.symbols.len()),
            storage: sections.storage,
            header: sections.header_rva,
            import_directory: sections.import_directory,
        }))
    }

    /// Remove the patch from the image.
    ///
    /// # Errors
    /// Returns the decoding error if the embedded header is invalid, or
    /// [`crate::Error::Malformed`] if the image carries custom sections but no header. The image
    /// is unchanged on error.
    pub fn unpatch(&mut self) -> Result<UnpatchOutcome> {
        let mut image = self.image.clone();
        let outcome = unpatch_image(&mut image, &self.options.registry)?;
        self.image = image;
        Ok(outcome)
    }

    /// Turn descriptors into symbols according to the symbol policy.
    fn convert(&self, descriptors: &[SymbolDescriptor]) -> Result<(Vec<Symbol>, Vec<String>)> {
        let mut symbols = Vec::with_capacity(descriptors.len());
        let mut rejected = Vec::new();

        for descriptor in descriptors {
            match Symbol::try_from(descriptor) {
                Ok(symbol) => symbols.push(symbol),
                Err(error) => match self.options.symbol_policy {
                    SymbolPolicy::Abort => return Err(error),
                    SymbolPolicy::Skip => {
                        log::warn!("Skipping symbol: {error}");
                        rejected.push(descriptor.name.clone());
                    }
                },
            }
        }

        Ok((symbols, rejected))
    }
}

/// `true` if `image` carries any section added by patching.
#[must_use]
pub fn is_patched(image: &PeImage) -> bool {
    image
        .sections()
        .iter()
        .any(|section| CustomSection::from_name(&section.name()).is_some())
}

/// Decode the header embedded in `image`, if there is one.
fn read_header(image: &PeImage, registry: &SymbolRegistry) -> Result<Option<ImporterHeader>> {
    let Some(section) = image.section(CustomSection::Header.name()) else {
        return Ok(None);
    };

    let length = section.virtual_size.min(section.size_of_raw_data) as usize;
    let bytes = image.read_at_rva(section.virtual_address, length)?;
    ImporterHeader::read_from(&mut Parser::new(bytes), registry).map(Some)
}

fn unpatch_image(image: &mut PeImage, registry: &SymbolRegistry) -> Result<UnpatchOutcome> {
    if !is_patched(image) {
        return Ok(UnpatchOutcome::NotPatched);
    }

    let Some(header) = read_header(image, registry)? else {
        return Err(malformed_error!(
            "Image has patch sections but no {} section",
            CustomSection::Header
        ));
    };

    image.set_data_directory(DataDirectoryType::ImportTable, header.old_import_directory)?;
    log::debug!("Restored import directory {}", header.old_import_directory);

    let custom: Vec<String> = image
        .sections()
        .iter()
        .rev()
        .map(|section| section.name())
        .filter(|name| CustomSection::from_name(name).is_some())
        .collect();
    for name in custom {
        log::debug!("Removing section '{name}'");
        image.remove_section(&name)?;
    }

    log::info!("Removed patch with {} symbols", header.symbols.len());
    Ok(UnpatchOutcome::Restored { header })
}

/// Bind symbols to import slots in lookup table order, then add unbound virtual tables.
///
/// Returns the symbols to embed and the names of the symbols left out.
fn map_symbols(symbols: Vec<Symbol>, slots: &imports::SlotTable) -> (Vec<Symbol>, Vec<String>) {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (index, symbol) in symbols.iter().enumerate() {
        by_name.entry(symbol.name.as_str()).or_insert(index);
    }

    let mut targets = vec![None; symbols.len()];
    let mut order = Vec::new();
    for (name, slot) in slots.iter() {
        // Shadow symbols never take a slot, even when their name is imported.
        if let Some(&index) = by_name.get(name).filter(|&&index| !symbols[index].is_shadow()) {
            log::debug!("Mapping import {name} to {slot}");
            targets[index] = Some(slot);
            order.push(index);
        }
    }

    for (index, symbol) in symbols.iter().enumerate() {
        if targets[index].is_none() && symbol.is_shadow() && by_name[symbol.name.as_str()] == index
        {
            log::debug!("Mapping shadow symbol {}", symbol.name);
            order.push(index);
        }
    }

    let selected: HashSet<usize> = order.iter().copied().collect();
    let unmatched: Vec<String> = symbols
        .iter()
        .enumerate()
        .filter(|(index, _)| !selected.contains(index))
        .map(|(_, symbol)| symbol.name.clone())
        .collect();
    if !unmatched.is_empty() {
        log::debug!("{} symbols matched no import", unmatched.len());
    }

    let mut slots_by_index: Vec<Option<Symbol>> = symbols.into_iter().map(Some).collect();
    let mapped = order
        .into_iter()
        .filter_map(|index| {
            let mut symbol = slots_by_index[index].take()?;
            symbol.target = targets[index];
            Some(symbol)
        })
        .collect();

    (mapped, unmatched)
}

fn log_replaced(previous: &ImporterHeader, mapped: &[Symbol]) {
    let current: HashSet<&str> = mapped.iter().map(|symbol| symbol.name.as_str()).collect();
    let dropped: Vec<&str> = previous
        .symbols
        .iter()
        .map(|symbol| symbol.name.as_str())
        .filter(|name| !current.contains(name))
        .collect();

    if dropped.is_empty() {
        log::info!(
            "Replacing existing patch with {} symbols",
            previous.symbols.len()
        );
    } else {
        log::warn!(
            "Replacing existing patch; {} symbols are no longer embedded: {}",
            dropped.len(),
            dropped.join(", ")
        );
    }
}

/// Load the image at `path`, patch it and commit the result according to `options.commit`.
///
/// Nothing is written when the patch is skipped.
///
/// # Errors
/// Returns any error of loading, patching or committing; see [`Patcher::patch`] and
/// [`commit::commit_image`].
pub fn patch_file(
    path: &Path,
    descriptors: &[SymbolDescriptor],
    options: &PatchOptions,
) -> Result<PatchOutcome> {
    let mut patcher = Patcher::new(PeImage::load(path)?, options.clone());
    let outcome = patcher.patch(descriptors)?;

    if let PatchOutcome::Patched(_) = &outcome {
        commit_image(path, patcher.into_image().data(), &options.commit)?;
    }

    Ok(outcome)
}

/// Load the image at `path`, remove its patch and commit the result according to
/// `options.commit`.
///
/// Nothing is written when the image carries no patch.
///
/// # Errors
/// Returns any error of loading, unpatching or committing; see [`Patcher::unpatch`] and
/// [`commit::commit_image`].
pub fn unpatch_file(path: &Path, options: &PatchOptions) -> Result<UnpatchOutcome> {
    let mut patcher = Patcher::new(PeImage::load(path)?, options.clone());
    let outcome = patcher.unpatch()?;

    if let UnpatchOutcome::Restored { .. } = &outcome {
        commit_image(path, patcher.into_image().data(), &options.commit)?;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::SectionFlags,
        records::{Resolution, SymbolBody},
        test::{PeBuilder, Thunk},
    };

    const TARGET: &str = "Minecraft.Windows.exe";

    fn image() -> PeImage {
        PeImage::from_bytes(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .import_thunks(
                    TARGET,
                    &[
                        Thunk::Name("?tick@Level@@QEAAXXZ"),
                        Thunk::Ordinal(12),
                        Thunk::Name("??1Actor@@UEAA@XZ"),
                        Thunk::Name("?g_level@@3PEAVLevel@@EA"),
                    ],
                )
                .import("USER32.dll", &["MessageBoxA"])
                .build(),
        )
        .unwrap()
    }

    fn descriptors() -> Vec<SymbolDescriptor> {
        vec![
            SymbolDescriptor::function("?tick@Level@@QEAAXXZ").with_signature("40 53 48 83 EC 20"),
            SymbolDescriptor::function("??1Actor@@UEAA@XZ")
                .with_virtual(0, None)
                .destructor(),
            SymbolDescriptor::data("?g_level@@3PEAVLevel@@EA").with_address(0x5A0_0000),
            SymbolDescriptor::virtual_table("??_7Actor@@6B@").with_address(0x4F1_A2B0),
            SymbolDescriptor::function("?unused@@YAXXZ").with_address(0x10),
        ]
    }

    fn patched() -> (Patcher, PatchReport) {
        let mut patcher = Patcher::new(image(), PatchOptions::new());
        match patcher.patch(&descriptors()).unwrap() {
            PatchOutcome::Patched(report) => (patcher, report),
            other => panic!("expected a patch, got {other:?}"),
        }
    }

    #[test]
    fn patch_maps_symbols_to_address_table_slots() {
        let original = image();
        let (target_directory, target) =
            imports::locate_module(&original, DEFAULT_TARGET_PREFIX).unwrap().unwrap();
        let first_thunk = target.entry.descriptor.first_thunk.value();

        let (patcher, report) = patched();
        assert_eq!(report.module, TARGET);
        assert_eq!(report.mapped, 3);
        assert_eq!(report.shadow, 1);
        assert_eq!(report.with_storage, 2);
        assert_eq!(report.import_count, 4);
        assert_eq!(report.unmatched, vec!["?unused@@YAXXZ".to_string()]);
        assert_eq!(report.replaced, None);

        let header = patcher.header().unwrap().unwrap();
        assert_eq!(header.import_count, 4);
        assert_eq!(header.old_import_directory, target_directory.location);

        let names: Vec<_> = header.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "?tick@Level@@QEAAXXZ",
                "??1Actor@@UEAA@XZ",
                "?g_level@@3PEAVLevel@@EA",
                "??_7Actor@@6B@"
            ]
        );

        // Ordinal entry at index 1 still occupies a slot.
        assert_eq!(header.symbols[0].target, Some(Rva(first_thunk)));
        assert_eq!(header.symbols[1].target, Some(Rva(first_thunk + 16)));
        assert_eq!(header.symbols[2].target, Some(Rva(first_thunk + 24)));
        assert_eq!(header.symbols[3].target, None);
    }

    #[test]
    fn storage_is_placed_in_rtis() {
        let (patcher, report) = patched();
        let header = patcher.header().unwrap().unwrap();
        let storage = patcher.image().section(".rtis").unwrap();
        assert_eq!(storage.virtual_address, report.storage);
        assert_eq!(storage.flags(), CustomSection::Storage.flags());

        let thunk = header.symbols[1].storage.unwrap();
        assert_eq!(thunk.value() % 16, 0);
        assert_eq!(
            patcher.image().read_at_rva(thunk, 14).unwrap(),
            &storage::thunk_code(storage::SENTINEL)
        );

        let cell = header.symbols[3].storage.unwrap();
        assert_eq!(cell.value() % 8, 0);
        assert_eq!(patcher.image().read_at_rva(cell, 8).unwrap(), &[0; 8]);

        assert_eq!(header.symbols[0].storage, None);
        assert_eq!(header.symbols[2].storage, None);
    }

    #[test]
    fn new_import_directory_excludes_target() {
        let (patcher, report) = patched();
        let directory = ImportDirectory::read(patcher.image()).unwrap().unwrap();
        let modules: Vec<_> = directory.entries.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(modules, ["KERNEL32.dll", "USER32.dll"]);
        assert_eq!(directory.location, report.import_directory);
        assert_eq!(report.import_directory.size, 60);

        let names: Vec<_> = patcher.image().sections().iter().map(|s| s.name()).collect();
        assert_eq!(names, [".text", ".idata", ".rtis", ".rtih", ".nidt"]);
    }

    #[test]
    fn patched_image_reloads() {
        let (patcher, _) = patched();
        let file = crate::File::from_mem(patcher.into_image().into_bytes()).unwrap();
        assert_eq!(
            file.libraries(),
            vec!["KERNEL32.dll".to_string(), "USER32.dll".to_string()]
        );
    }

    #[test]
    fn unpatch_restores_original_bytes() {
        let original = image();
        let (mut patcher, _) = patched();
        assert!(patcher.is_patched());

        match patcher.unpatch().unwrap() {
            UnpatchOutcome::Restored { header } => assert_eq!(header.symbols.len(), 4),
            other => panic!("expected a restore, got {other:?}"),
        }
        assert!(!patcher.is_patched());
        assert_eq!(patcher.image().data(), original.data());

        assert_eq!(patcher.unpatch().unwrap(), UnpatchOutcome::NotPatched);
    }

    #[test]
    fn repatch_replaces_previous_patch() {
        let (mut patcher, _) = patched();
        let first = patcher.image().data().to_vec();

        let report = match patcher.patch(&descriptors()).unwrap() {
            PatchOutcome::Patched(report) => report,
            other => panic!("expected a patch, got {other:?}"),
        };
        assert_eq!(report.replaced, Some(4));
        assert_eq!(patcher.image().data(), first.as_slice());

        let all = descriptors();
        patcher.patch(&all[..1]).unwrap();
        let header = patcher.header().unwrap().unwrap();
        assert_eq!(header.symbols.len(), 1);
        assert_eq!(
            patcher
                .image()
                .sections()
                .iter()
                .filter(|s| s.name() == ".rtih")
                .count(),
            1
        );
    }

    #[test]
    fn skipped_images_are_untouched() {
        let bare = PeImage::from_bytes(PeBuilder::new().build()).unwrap();
        let bytes = bare.data().to_vec();
        let mut patcher = Patcher::new(bare, PatchOptions::new());
        assert_eq!(
            patcher.patch(&descriptors()).unwrap(),
            PatchOutcome::Skipped(SkipReason::NoImportDirectory)
        );
        assert_eq!(patcher.image().data(), bytes.as_slice());

        let other = PeImage::from_bytes(
            PeBuilder::new()
                .import("KERNEL32.dll", &["ExitProcess"])
                .build(),
        )
        .unwrap();
        let bytes = other.data().to_vec();
        let mut patcher = Patcher::new(other, PatchOptions::new());
        assert!(matches!(
            patcher.patch(&descriptors()).unwrap(),
            PatchOutcome::Skipped(SkipReason::ModuleNotImported(_))
        ));
        assert_eq!(patcher.image().data(), bytes.as_slice());
    }

    #[test]
    fn target_prefix_is_configurable() {
        let mut patcher = Patcher::new(
            image(),
            PatchOptions::new().with_target_module("user32"),
        );
        match patcher.patch(&[]).unwrap() {
            PatchOutcome::Patched(report) => {
                assert_eq!(report.module, "USER32.dll");
                assert_eq!(report.mapped, 0);
                assert_eq!(report.import_count, 1);
            }
            other => panic!("expected a patch, got {other:?}"),
        }
    }

    #[test]
    fn invalid_symbols_follow_policy() {
        let mut symbols = descriptors();
        symbols.push(
            SymbolDescriptor::function("?bad@@YAXXZ")
                .with_address(1)
                .with_signature("90"),
        );

        let mut patcher = Patcher::new(image(), PatchOptions::new());
        match patcher.patch(&symbols).unwrap() {
            PatchOutcome::Patched(report) => {
                assert_eq!(report.rejected, vec!["?bad@@YAXXZ".to_string()]);
            }
            other => panic!("expected a patch, got {other:?}"),
        }

        let original = image();
        let mut patcher = Patcher::new(
            original.clone(),
            PatchOptions::new().with_symbol_policy(SymbolPolicy::Abort),
        );
        assert!(matches!(
            patcher.patch(&symbols),
            Err(Error::InvalidSymbol { .. })
        ));
        assert_eq!(patcher.image().data(), original.data());
    }

    #[test]
    fn corrupt_header_blocks_unpatch_and_repatch() {
        let (patcher, report) = patched();
        let mut image = patcher.into_image();
        image.write_at_rva(report.header, &[0xFF; 8]).unwrap();
        let corrupt = image.data().to_vec();

        let mut patcher = Patcher::new(image, PatchOptions::new());
        assert!(matches!(
            patcher.unpatch(),
            Err(Error::InvalidMagic { .. })
        ));
        assert_eq!(patcher.image().data(), corrupt.as_slice());

        assert!(matches!(
            patcher.patch(&descriptors()),
            Err(Error::UnpatchFailed(_))
        ));
        assert_eq!(patcher.image().data(), corrupt.as_slice());
    }

    #[test]
    fn custom_sections_without_header() {
        let mut image = image();
        image
            .append_section(".rtis", SectionFlags::MEM_READ, &[0; 8])
            .unwrap();
        let mut patcher = Patcher::new(image, PatchOptions::new());
        assert!(patcher.is_patched());
        assert!(patcher.header().unwrap().is_none());
        assert!(matches!(patcher.unpatch(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn full_section_table_fails_cleanly() {
        let bytes = PeBuilder::new()
            .import(TARGET, &["?tick@Level@@QEAAXXZ"])
            .tight_headers()
            .build();
        let mut patcher = Patcher::new(PeImage::from_bytes(bytes.clone()).unwrap(), PatchOptions::new());

        assert!(matches!(
            patcher.patch(&descriptors()),
            Err(Error::NoSectionHeaderSpace { .. })
        ));
        assert_eq!(patcher.image().data(), bytes.as_slice());
    }

    #[test]
    fn virtual_destructor_record() {
        let (patcher, _) = patched();
        let header = patcher.header().unwrap().unwrap();
        match &header.symbols[1].body {
            SymbolBody::Function(function) => {
                assert!(function.is_destructor);
                assert_eq!(
                    function.resolution,
                    Resolution::Virtual {
                        index: 0,
                        table: "this".to_string()
                    }
                );
            }
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn imported_virtual_table_stays_shadow() {
        let image = PeImage::from_bytes(
            PeBuilder::new()
                .import(TARGET, &["??_7Actor@@6B@", "?f@@YAXXZ"])
                .build(),
        )
        .unwrap();
        let mut patcher = Patcher::new(image, PatchOptions::new());
        let outcome = patcher
            .patch(&[
                SymbolDescriptor::virtual_table("??_7Actor@@6B@").with_address(0x4F1_A2B0),
                SymbolDescriptor::function("?f@@YAXXZ").with_address(0x10),
            ])
            .unwrap();
        let report = match outcome {
            PatchOutcome::Patched(report) => report,
            other => panic!("expected a patch, got {other:?}"),
        };
        assert_eq!(report.mapped, 1);
        assert_eq!(report.shadow, 1);
        assert!(report.unmatched.is_empty());

        let header = patcher.header().unwrap().unwrap();
        let names: Vec<_> = header.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["?f@@YAXXZ", "??_7Actor@@6B@"]);
        assert!(header.symbols[1].is_shadow());
        assert_eq!(header.symbols[1].target, None);
        assert!(header.symbols[1].storage.is_some());
        assert!(header.symbols[0].target.is_some());
    }

    #[test]
    fn destructor_thunks_back_to_back() {
        let image = PeImage::from_bytes(
            PeBuilder::new()
                .import(TARGET, &["??1Actor@@UEAA@XZ", "??1Mob@@UEAA@XZ"])
                .build(),
        )
        .unwrap();
        let mut patcher = Patcher::new(image, PatchOptions::new());
        let outcome = patcher
            .patch(&[
                SymbolDescriptor::function("??1Actor@@UEAA@XZ")
                    .with_virtual(0, None)
                    .destructor(),
                SymbolDescriptor::function("??1Mob@@UEAA@XZ")
                    .with_virtual(0, None)
                    .destructor(),
                SymbolDescriptor::virtual_table("??_7Mob@@6B@").with_address(0x4F1_A2B0),
            ])
            .unwrap();
        let report = match outcome {
            PatchOutcome::Patched(report) => report,
            other => panic!("expected a patch, got {other:?}"),
        };
        assert_eq!(report.with_storage, 3);

        let header = patcher.header().unwrap().unwrap();
        let first = header.symbols[0].storage.unwrap().value();
        let second = header.symbols[1].storage.unwrap().value();
        let cell = header.symbols[2].storage.unwrap().value();

        assert_eq!(first % 16, 0);
        assert_eq!(second % 16, 0);
        assert!(second - first >= 14);
        assert_eq!(cell % 8, 0);
        assert!(cell - second >= 14);

        let code = storage::thunk_code(storage::SENTINEL);
        for thunk in [first, second] {
            assert_eq!(patcher.image().read_at_rva(Rva(thunk), 14).unwrap(), &code);
        }
        assert_eq!(patcher.image().read_at_rva(Rva(cell), 8).unwrap(), &[0; 8]);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Mod.dll");
        let original = image().into_bytes();
        std::fs::write(&path, &original).unwrap();

        let outcome = patch_file(&path, &descriptors(), &PatchOptions::new()).unwrap();
        assert!(matches!(outcome, PatchOutcome::Patched(_)));
        assert_eq!(std::fs::read(dir.path().join("Mod.dll.backup")).unwrap(), original);
        assert_ne!(std::fs::read(&path).unwrap(), original);

        let outcome = unpatch_file(&path, &PatchOptions::new().with_backup_suffix(".prev")).unwrap();
        assert!(matches!(outcome, UnpatchOutcome::Restored { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert!(dir.path().join("Mod.dll.prev").exists());

        assert_eq!(
            unpatch_file(&path, &PatchOptions::new()).unwrap(),
            UnpatchOutcome::NotPatched
        );
    }
}
