//! The importer header: the self-describing record written into patched images.
//!
//! # Layout
//!
//! ```text
//! magic str ("AME_RTI") | version u32 | format str | count u32 | count × symbol record
//!     | old_import_directory_rva u32 | old_import_directory_size u32 | import_count u32
//! ```
//!
//! The trailing fields capture what patching replaced: the original import data directory, which
//! unpatching restores, and the number of import slots the removed module had.

use std::fmt;

use crate::{
    file::{parser::Parser, writer::Writer},
    records::{offset::Rva, registry::SymbolRegistry, symbol::Symbol, symbol::FORMAT_PE32_PLUS},
    Error, Result,
};

/// A `(rva, size)` pair as stored in the optional header's data directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// Start of the directory
    pub rva: Rva,
    /// Size of the directory in bytes
    pub size: u32,
}

impl DataDirectory {
    /// `true` if the directory is not present in the image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rva.value() == 0 || self.size == 0
    }
}

impl fmt::Display for DataDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.rva, self.size)
    }
}

/// The identifying fields at the start of an importer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderType {
    /// Header version
    pub version: u32,
    /// Format type tag
    pub format: String,
}

impl HeaderType {
    /// Verify the magic and read version and format without consuming anything.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidMagic`] if the data does not start with the magic string,
    /// or a read error if it is truncated.
    pub fn peek(parser: &mut Parser) -> Result<Self> {
        parser.peek_with(|parser| {
            read_magic(parser)?;
            Ok(HeaderType {
                version: parser.read_le::<u32>()?,
                format: parser.read_prefixed_string()?,
            })
        })
    }
}

/// Everything a runtime importer needs to resolve the symbols of a removed module.
///
/// # Examples
///
/// ```rust
/// use modtweak::records::{DataDirectory, ImporterHeader, Rva, Symbol, SymbolDescriptor};
///
/// let header = ImporterHeader {
///     symbols: vec![Symbol::try_from(
///         &SymbolDescriptor::function("?tick@Level@@QEAAXXZ").with_address(0x1F00),
///     )?],
///     old_import_directory: DataDirectory { rva: Rva(0x3000), size: 60 },
///     import_count: 4,
/// };
///
/// let bytes = header.to_bytes()?;
/// assert_eq!(ImporterHeader::from_bytes(&bytes)?, header);
/// # Ok::<(), modtweak::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImporterHeader {
    /// Records for every embedded symbol
    pub symbols: Vec<Symbol>,
    /// The import data directory before patching
    pub old_import_directory: DataDirectory,
    /// Number of import slots of the removed module, ordinal entries included
    pub import_count: u32,
}

impl ImporterHeader {
    /// Magic string every header starts with.
    pub const MAGIC: &'static str = "AME_RTI";

    /// Header version this crate writes and reads.
    pub const VERSION: u32 = 1;

    /// Format type tag of PE32+ headers.
    pub const FORMAT: &'static str = FORMAT_PE32_PLUS;

    /// Serialize the header and all symbol records.
    ///
    /// # Errors
    /// Returns an error if a symbol cannot be serialized, see [`Symbol::write_to`].
    pub fn write_to(&self, writer: &mut Writer) -> Result<()> {
        let count = u32::try_from(self.symbols.len())
            .map_err(|_| malformed_error!("Too many symbols - {}", self.symbols.len()))?;

        writer.write_prefixed_string(Self::MAGIC);
        writer.write_le(Self::VERSION);
        writer.write_prefixed_string(Self::FORMAT);
        writer.write_le(count);
        for symbol in &self.symbols {
            symbol.write_to(writer)?;
        }
        writer.write_le(self.old_import_directory.rva.value());
        writer.write_le(self.old_import_directory.size);
        writer.write_le(self.import_count);

        Ok(())
    }

    /// Serialize into a new buffer.
    ///
    /// # Errors
    /// See [`ImporterHeader::write_to`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// Decode a header, dispatching symbol records through `registry`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidMagic`] for a wrong magic,
    /// [`crate::Error::FormatMismatch`] for an unsupported version or format, and any error of
    /// the symbol decoders. The parser position is unchanged on error.
    pub fn read_from(parser: &mut Parser, registry: &SymbolRegistry) -> Result<Self> {
        parser.transactional(|parser| {
            read_magic(parser)?;

            let version = parser.read_le::<u32>()?;
            if version != Self::VERSION {
                return Err(Error::FormatMismatch {
                    field: "version",
                    expected: Self::VERSION.to_string(),
                    actual: version.to_string(),
                });
            }

            let format = parser.read_prefixed_string()?;
            if format != Self::FORMAT {
                return Err(Error::FormatMismatch {
                    field: "format",
                    expected: Self::FORMAT.to_string(),
                    actual: format,
                });
            }

            let count = parser.read_le::<u32>()?;
            // Each record is at least 20 bytes.
            let mut symbols = Vec::with_capacity((count as usize).min(parser.remaining() / 20));
            for _ in 0..count {
                symbols.push(registry.decode(parser)?);
            }

            let rva = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;
            let import_count = parser.read_le::<u32>()?;

            Ok(ImporterHeader {
                symbols,
                old_import_directory: DataDirectory {
                    rva: Rva(rva),
                    size,
                },
                import_count,
            })
        })
    }

    /// Decode a header from the start of `data` using the builtin record layouts.
    ///
    /// Bytes after the header, such as section padding, are ignored.
    ///
    /// # Errors
    /// See [`ImporterHeader::read_from`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from(&mut Parser::new(data), &SymbolRegistry::builtin())
    }
}

fn read_magic(parser: &mut Parser) -> Result<()> {
    let invalid = |actual: String| Error::InvalidMagic {
        expected: ImporterHeader::MAGIC,
        actual,
    };

    // A wrong length prefix can claim far more than is present, which is still a bad magic.
    let length = parser.read_le::<u32>()? as usize;
    if length != ImporterHeader::MAGIC.len() {
        return Err(invalid(format!("<{length} bytes>")));
    }

    let bytes = parser.read_bytes(length)?;
    if bytes != ImporterHeader::MAGIC.as_bytes() {
        return Err(invalid(String::from_utf8_lossy(bytes).into_owned()));
    }

    Ok(())
}
