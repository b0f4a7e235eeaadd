//! The binary record format embedded in patched images.
//!
//! Patching replaces an import dependency with a self-describing record section. This module
//! defines that format and its codec:
//!
//! - [`crate::records::symbol`] - one record per imported symbol, with kind-specific layouts
//! - [`crate::records::registry`] - selects a decoder from a record's `(version, format, kind)`
//! - [`crate::records::header`] - the [`ImporterHeader`] that holds all symbol records
//! - [`crate::records::descriptor`] - validated conversion from caller-supplied descriptions
//! - [`crate::records::offset`] - address newtypes shared with the storage allocator
//!
//! Every record is self-verifying: decoders check the identifying fields they were selected for
//! and fail with [`crate::Error::FormatMismatch`] instead of misreading newer or foreign data.
//!
//! # Examples
//!
//! ```rust
//! use modtweak::records::{DataDirectory, ImporterHeader, Rva, Symbol, SymbolDescriptor};
//!
//! let symbols = [
//!     SymbolDescriptor::function("?getLevel@Minecraft@@QEBAPEAVLevel@@XZ").with_address(0x2A10),
//!     SymbolDescriptor::virtual_table("??_7Actor@@6B@").with_signature("48 8D 05 ? ? ? ?"),
//! ]
//! .iter()
//! .map(Symbol::try_from)
//! .collect::<Result<Vec<_>, _>>()?;
//!
//! let header = ImporterHeader {
//!     symbols,
//!     old_import_directory: DataDirectory { rva: Rva(0x4000), size: 40 },
//!     import_count: 1,
//! };
//! let decoded = ImporterHeader::from_bytes(&header.to_bytes()?)?;
//! assert_eq!(decoded.symbols.len(), 2);
//! # Ok::<(), modtweak::Error>(())
//! ```

pub mod descriptor;
pub mod header;
pub mod offset;
pub mod registry;
pub mod symbol;

pub use descriptor::{SymbolDescriptor, DEFAULT_VIRTUAL_TABLE};
pub use header::{DataDirectory, HeaderType, ImporterHeader};
pub use offset::{RelativeOffset, Rva};
pub use registry::{SymbolDecoder, SymbolRegistry};
pub use symbol::{
    DataSymbol, FunctionSymbol, Locator, Resolution, StorageKind, Symbol, SymbolBody, SymbolKind,
    SymbolType, DATA_LEGACY_VERSION, DATA_VERSION, FORMAT_PE32_PLUS, FUNCTION_VERSION,
};
