// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'file/output.rs' uses a mutable mmap for the committed image

//! # modtweak
//!
//! Retargets the imports of PE32+ modules so that a runtime resolver, instead of the Windows
//! loader, binds them.
//!
//! A mod DLL built against a host executable imports the host's functions and variables like any
//! other module. Those imports break whenever the host is rebuilt. `modtweak` removes the host
//! from the DLL's import directory and embeds, in new sections, everything a resolver running
//! inside the host needs to bind each import itself: the import slot to fill, and how to locate
//! the symbol (an address, a byte signature or a virtual table index).
//!
//! ## Features
//!
//! - **Reversible** - the original import directory is recorded and unpatching restores the image
//!   byte for byte
//! - **Idempotent** - patching an already patched image replaces the previous patch
//! - **Versioned records** - the embedded header and every symbol record carry a version, format
//!   and kind so newer layouts can be added next to the old ones
//! - **Safe commits** - images are written to a temporary file, the original is backed up and
//!   only then replaced
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modtweak::{PatchOptions, PatchOutcome, SymbolDescriptor};
//! use std::path::Path;
//!
//! let symbols = vec![
//!     SymbolDescriptor::function("?tick@Level@@QEAAXXZ").with_address(0x1A2B30),
//!     SymbolDescriptor::function("??1Actor@@UEAA@XZ").with_virtual(0, None).destructor(),
//!     SymbolDescriptor::virtual_table("??_7Actor@@6B@").with_signature("48 8D 05 ? ? ? ?"),
//! ];
//!
//! match modtweak::patch_file(Path::new("Mod.dll"), &symbols, &PatchOptions::new())? {
//!     PatchOutcome::Patched(report) => println!("{} imports retargeted", report.mapped),
//!     PatchOutcome::Skipped(reason) => println!("left unchanged: {reason}"),
//! }
//! # Ok::<(), modtweak::Error>(())
//! ```
//!
//! ### Working in Memory
//!
//! ```rust,no_run
//! use modtweak::{PatchOptions, Patcher, PeImage, UnpatchOutcome};
//!
//! let image = PeImage::from_bytes(std::fs::read("Mod.dll")?)?;
//! let mut patcher = Patcher::new(image, PatchOptions::new());
//!
//! if let Some(header) = patcher.header()? {
//!     println!("{} symbols embedded", header.symbols.len());
//! }
//!
//! if let UnpatchOutcome::Restored { .. } = patcher.unpatch()? {
//!     std::fs::write("Mod.clean.dll", patcher.into_image().into_bytes())?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Patched Image Layout
//!
//! | Section | Contents |
//! |---------|----------|
//! | `.rtis` | runtime state slot, destructor thunks and virtual table cells |
//! | `.rtih` | the [`records::ImporterHeader`] with one record per embedded symbol |
//! | `.nidt` | the import directory without the removed module |
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Images that have nothing to patch are not
//! errors and are reported through [`PatchOutcome::Skipped`]:
//!
//! ```rust,no_run
//! use modtweak::{Error, PatchOptions};
//!
//! match modtweak::patch_file(std::path::Path::new("Mod.dll"), &[], &PatchOptions::new()) {
//!     Ok(outcome) => println!("{outcome:?}"),
//!     Err(Error::NotSupported) => println!("not a PE32+ image"),
//!     Err(Error::Malformed { message, .. }) => println!("malformed image: {message}"),
//!     Err(e) => println!("other error: {e}"),
//! }
//! ```

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;
pub(crate) mod utils;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Editable PE32+ images
///
/// [`image::PeImage`] holds an owned copy of an image and keeps the headers consistent while
/// sections are appended or removed and data directories are rewritten.
///
/// # Examples
///
/// ```rust,no_run
/// use modtweak::image::{DataDirectoryType, PeImage};
/// use std::path::Path;
///
/// let image = PeImage::load(Path::new("Mod.dll"))?;
/// for section in image.sections() {
///     println!("{section}");
/// }
/// println!("imports: {}", image.data_directory(DataDirectoryType::ImportTable)?);
/// # Ok::<(), modtweak::Error>(())
/// ```
pub mod image;

/// The binary records embedded in patched images
///
/// This module defines the symbol records, the importer header that holds them, and the
/// registry used to decode records by their `(version, format, kind)` triple.
///
/// # Key Types
///
/// - [`records::Symbol`] - one embedded symbol and its record layout
/// - [`records::SymbolDescriptor`] - unvalidated symbol input
/// - [`records::ImporterHeader`] - the `.rtih` contents
/// - [`records::SymbolRegistry`] - record triple to decoder dispatch
/// - [`records::Rva`] / [`records::RelativeOffset`] - image addresses and buffer offsets
pub mod records;

/// Patching and unpatching
///
/// See [`Patcher`] for in-memory use and [`patch_file`] / [`unpatch_file`] for the complete
/// load, patch and commit sequence.
pub mod patch;

/// `modtweak` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use modtweak::{PeImage, Result};
///
/// fn load(path: &str) -> Result<PeImage> {
///     PeImage::load(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `modtweak` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Low-level file access and byte parsing.
///
/// [`File`] is the validated read-only image, [`Parser`] and [`Writer`] read and write the
/// little-endian encodings used by the embedded records.
///
/// # Example
///
/// ```rust
/// use modtweak::{Parser, Writer};
///
/// let mut writer = Writer::new();
/// writer.write_prefixed_string("pe32+");
/// let bytes = writer.into_inner();
///
/// let mut parser = Parser::new(&bytes);
/// assert_eq!(parser.read_prefixed_string()?, "pe32+");
/// # Ok::<(), modtweak::Error>(())
/// ```
pub use file::{parser::Parser, writer::Writer, File};

pub use image::PeImage;
pub use patch::{
    commit::CommitMode, patch_file, unpatch_file, PatchOptions, PatchOutcome, PatchReport,
    Patcher, SkipReason, SymbolPolicy, UnpatchOutcome,
};
pub use records::{ImporterHeader, Symbol, SymbolDescriptor};
