//! Symbol records: the per-import entries embedded in a patched image.
//!
//! Every symbol the removed module would have supplied is described by one [`Symbol`]. The
//! runtime resolver reads these records back to decide how to locate each symbol: through a
//! virtual table index, a byte signature, or an absolute address.
//!
//! # Record Layout
//!
//! All records share a common prefix, followed by fields specific to their kind:
//!
//! ```text
//! version u32 | format str | kind str | name str | target u32 | has_storage u8 | storage u32
//! ```
//!
//! `str` is a `u32` byte length followed by UTF-8 bytes. A `target` or `storage` of `0` means
//! "not assigned".
//!
//! | Kind       | Version | Fields after the prefix                                                                  |
//! |------------|---------|------------------------------------------------------------------------------------------|
//! | `function` | 1       | `is_destructor u8, is_virtual u8`, then `index u32, table str` or `is_signature u8, signature str \| address u64` |
//! | `data`     | 1       | `is_vtable_address u8, is_vtable u8, address u64`                                        |
//! | `data`     | 2       | the version 1 fields, then `is_signature u8` and `signature str` when set                |
//!
//! Data records at version 1 cannot carry a signature. They are still decoded so that images
//! patched by older tooling can be inspected and restored.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    file::{parser::Parser, writer::Writer},
    records::offset::Rva,
    Error, Result,
};

/// Format type tag of every record produced for PE32+ images.
pub const FORMAT_PE32_PLUS: &str = "pe32+";

/// Record version written for function symbols.
pub const FUNCTION_VERSION: u32 = 1;

/// Record version written for data symbols.
pub const DATA_VERSION: u32 = 2;

/// Oldest data symbol record version that can still be decoded.
pub const DATA_LEGACY_VERSION: u32 = 1;

/// The two symbol kinds a record can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolKind {
    /// Executable code, called through an import slot or a thunk
    Function,
    /// A variable or virtual table
    Data,
}

/// How the runtime resolver locates a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Fixed address relative to the host module
    Address(u64),
    /// Byte pattern to scan for, with wildcard tokens
    Signature(String),
    /// Slot `index` of the virtual table named `table`
    Virtual {
        /// Index into the virtual table
        index: u32,
        /// Name of the virtual table, `"this"` for the owning class's own table
        table: String,
    },
}

/// Fields specific to a function symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    /// The function is a destructor
    pub is_destructor: bool,
    /// How the function is located at runtime
    pub resolution: Resolution,
}

impl FunctionSymbol {
    /// `true` if the function is resolved through a virtual table.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self.resolution, Resolution::Virtual { .. })
    }

    /// `true` if the function is located by signature scan.
    #[must_use]
    pub fn is_signature(&self) -> bool {
        matches!(self.resolution, Resolution::Signature(_))
    }

    fn write_to(&self, writer: &mut Writer) {
        writer.write_bool(self.is_destructor);
        writer.write_bool(self.is_virtual());
        match &self.resolution {
            Resolution::Virtual { index, table } => {
                writer.write_le(*index);
                writer.write_prefixed_string(table);
            }
            Resolution::Signature(signature) => {
                writer.write_bool(true);
                writer.write_prefixed_string(signature);
            }
            Resolution::Address(address) => {
                writer.write_bool(false);
                writer.write_le(*address);
            }
        }
    }

    fn read_from(parser: &mut Parser) -> Result<Self> {
        let is_destructor = parser.read_bool()?;
        let resolution = if parser.read_bool()? {
            Resolution::Virtual {
                index: parser.read_le::<u32>()?,
                table: parser.read_prefixed_string()?,
            }
        } else if parser.read_bool()? {
            Resolution::Signature(parser.read_prefixed_string()?)
        } else {
            Resolution::Address(parser.read_le::<u64>()?)
        };

        Ok(FunctionSymbol {
            is_destructor,
            resolution,
        })
    }
}

/// How the runtime resolver locates a data symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Fixed address relative to the host module
    Address(u64),
    /// Byte pattern to scan for, with wildcard tokens
    Signature(String),
}

/// Fields specific to a data symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSymbol {
    /// The symbol is a virtual table; such symbols are shadow symbols
    pub is_virtual_table: bool,
    /// The located address is the address of a virtual table pointer
    pub is_virtual_table_address: bool,
    /// How the symbol is located at runtime
    pub locator: Locator,
}

impl DataSymbol {
    fn write_to(&self, version: u32, writer: &mut Writer) {
        writer.write_bool(self.is_virtual_table_address);
        writer.write_bool(self.is_virtual_table);
        match &self.locator {
            Locator::Address(address) => writer.write_le(*address),
            Locator::Signature(_) => writer.write_le(0u64),
        }

        if version >= DATA_VERSION {
            match &self.locator {
                Locator::Signature(signature) => {
                    writer.write_bool(true);
                    writer.write_prefixed_string(signature);
                }
                Locator::Address(_) => writer.write_bool(false),
            }
        }
    }

    fn read_from(version: u32, parser: &mut Parser) -> Result<Self> {
        let is_virtual_table_address = parser.read_bool()?;
        let is_virtual_table = parser.read_bool()?;
        let address = parser.read_le::<u64>()?;

        let locator = if version >= DATA_VERSION && parser.read_bool()? {
            Locator::Signature(parser.read_prefixed_string()?)
        } else {
            Locator::Address(address)
        };

        Ok(DataSymbol {
            is_virtual_table,
            is_virtual_table_address,
            locator,
        })
    }
}

/// The kind-specific part of a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolBody {
    /// A function symbol
    Function(FunctionSymbol),
    /// A data symbol
    Data(DataSymbol),
}

/// The kind of scratch storage a symbol needs at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// A 16-byte aligned code thunk, used by virtual destructors
    Thunk,
    /// An 8-byte aligned pointer cell, used by virtual tables
    Cell,
}

/// One imported symbol and everything the runtime resolver needs to locate it.
///
/// # Examples
///
/// ```rust
/// use modtweak::records::{FunctionSymbol, Resolution, Symbol};
/// use modtweak::{Parser, Writer};
///
/// let symbol = Symbol::function(
///     "??1Actor@@UEAA@XZ",
///     FunctionSymbol {
///         is_destructor: true,
///         resolution: Resolution::Virtual { index: 0, table: "this".into() },
///     },
/// );
/// assert!(symbol.needs_storage());
///
/// let mut writer = Writer::new();
/// symbol.write_to(&mut writer)?;
/// let bytes = writer.into_inner();
///
/// let decoded = Symbol::read_function_v1(&mut Parser::new(&bytes))?;
/// assert_eq!(decoded, symbol);
/// # Ok::<(), modtweak::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Link-time (mangled) name, matched exactly against import names
    pub name: String,
    /// Record version this symbol is written with
    pub version: u32,
    /// Import slot this symbol fills, assigned while patching
    pub target: Option<Rva>,
    /// Address of the symbol's scratch storage, assigned while patching
    pub storage: Option<Rva>,
    /// Kind-specific fields
    pub body: SymbolBody,
}

impl Symbol {
    /// A function symbol at the current record version.
    pub fn function(name: impl Into<String>, function: FunctionSymbol) -> Self {
        Symbol {
            name: name.into(),
            version: FUNCTION_VERSION,
            target: None,
            storage: None,
            body: SymbolBody::Function(function),
        }
    }

    /// A data symbol at the current record version.
    pub fn data(name: impl Into<String>, data: DataSymbol) -> Self {
        Symbol {
            name: name.into(),
            version: DATA_VERSION,
            target: None,
            storage: None,
            body: SymbolBody::Data(data),
        }
    }

    /// The symbol's kind.
    #[must_use]
    pub fn kind(&self) -> SymbolKind {
        match self.body {
            SymbolBody::Function(_) => SymbolKind::Function,
            SymbolBody::Data(_) => SymbolKind::Data,
        }
    }

    /// Format type tag of the record.
    #[must_use]
    pub fn format(&self) -> &'static str {
        FORMAT_PE32_PLUS
    }

    /// `true` for virtual tables, which are embedded even when no import slot refers to them.
    #[must_use]
    pub fn is_shadow(&self) -> bool {
        matches!(&self.body, SymbolBody::Data(data) if data.is_virtual_table)
    }

    /// The storage this symbol needs, if any.
    #[must_use]
    pub fn storage_kind(&self) -> Option<StorageKind> {
        match &self.body {
            SymbolBody::Function(function) if function.is_destructor && function.is_virtual() => {
                Some(StorageKind::Thunk)
            }
            SymbolBody::Data(data) if data.is_virtual_table => Some(StorageKind::Cell),
            _ => None,
        }
    }

    /// `true` if the symbol needs scratch storage.
    #[must_use]
    pub fn needs_storage(&self) -> bool {
        self.storage_kind().is_some()
    }

    /// Serialize the record.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnregisteredSymbolType`] if the symbol's version has no record
    /// layout, or [`crate::Error::InvalidSymbol`] for a legacy data record located by signature.
    pub fn write_to(&self, writer: &mut Writer) -> Result<()> {
        let supported = match &self.body {
            SymbolBody::Function(_) => self.version == FUNCTION_VERSION,
            SymbolBody::Data(_) => {
                self.version == DATA_VERSION || self.version == DATA_LEGACY_VERSION
            }
        };
        if !supported {
            return Err(Error::UnregisteredSymbolType {
                version: self.version,
                format: FORMAT_PE32_PLUS.to_string(),
                kind: self.kind().to_string(),
            });
        }

        if let SymbolBody::Data(DataSymbol {
            locator: Locator::Signature(_),
            ..
        }) = &self.body
        {
            if self.version < DATA_VERSION {
                return Err(Error::InvalidSymbol {
                    name: self.name.clone(),
                    reason: format!("data records at version {} have no signature", self.version),
                });
            }
        }

        let kind: &'static str = self.kind().into();
        writer.write_le(self.version);
        writer.write_prefixed_string(FORMAT_PE32_PLUS);
        writer.write_prefixed_string(kind);
        writer.write_prefixed_string(&self.name);
        writer.write_le(self.target.map_or(0, Rva::value));
        writer.write_bool(self.needs_storage());
        writer.write_le(self.storage.map_or(0, Rva::value));

        match &self.body {
            SymbolBody::Function(function) => function.write_to(writer),
            SymbolBody::Data(data) => data.write_to(self.version, writer),
        }

        Ok(())
    }

    /// Decode a version 1 function record.
    ///
    /// # Errors
    /// Returns [`crate::Error::FormatMismatch`] if the record is not a version 1 PE32+ function,
    /// or a read error if it is truncated.
    pub fn read_function_v1(parser: &mut Parser) -> Result<Self> {
        parser.transactional(|parser| {
            let mut symbol = read_common(parser, FUNCTION_VERSION, SymbolKind::Function)?;
            let function = FunctionSymbol::read_from(parser)?;
            symbol.body = SymbolBody::Function(function);
            symbol.check_storage_flag()?;
            Ok(symbol)
        })
    }

    /// Decode a legacy version 1 data record.
    ///
    /// # Errors
    /// See [`Symbol::read_function_v1`].
    pub fn read_data_v1(parser: &mut Parser) -> Result<Self> {
        Self::read_data(parser, DATA_LEGACY_VERSION)
    }

    /// Decode a version 2 data record.
    ///
    /// # Errors
    /// See [`Symbol::read_function_v1`].
    pub fn read_data_v2(parser: &mut Parser) -> Result<Self> {
        Self::read_data(parser, DATA_VERSION)
    }

    fn read_data(parser: &mut Parser, version: u32) -> Result<Self> {
        parser.transactional(|parser| {
            let mut symbol = read_common(parser, version, SymbolKind::Data)?;
            let data = DataSymbol::read_from(version, parser)?;
            symbol.body = SymbolBody::Data(data);
            symbol.check_storage_flag()?;
            Ok(symbol)
        })
    }

    fn check_storage_flag(&mut self) -> Result<()> {
        // read_common stores the raw flag as Some/None; it must agree with the kind.
        if self.storage.is_some() != self.needs_storage() {
            return Err(malformed_error!(
                "Symbol '{}' storage flag does not match its kind",
                self.name
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symbol[v{}, {}, {}, {}]",
            self.version,
            FORMAT_PE32_PLUS,
            self.name,
            self.kind()
        )
    }
}

/// The identifying triple at the start of every symbol record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolType {
    /// Record version
    pub version: u32,
    /// Format type tag
    pub format: String,
    /// Kind tag, kept as text so unknown kinds can be reported
    pub kind: String,
}

impl SymbolType {
    /// Read the triple at the parser position without consuming it.
    ///
    /// # Errors
    /// Returns a read error if the record is truncated.
    pub fn peek(parser: &mut Parser) -> Result<Self> {
        parser.peek_with(|parser| {
            Ok(SymbolType {
                version: parser.read_le::<u32>()?,
                format: parser.read_prefixed_string()?,
                kind: parser.read_prefixed_string()?,
            })
        })
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}, {}, {}", self.version, self.format, self.kind)
    }
}

/// Read and verify the common record prefix.
///
/// The returned symbol carries a placeholder body that the caller replaces.
fn read_common(parser: &mut Parser, version: u32, kind: SymbolKind) -> Result<Symbol> {
    let actual_version = parser.read_le::<u32>()?;
    if actual_version != version {
        return Err(Error::FormatMismatch {
            field: "version",
            expected: version.to_string(),
            actual: actual_version.to_string(),
        });
    }

    let format = parser.read_prefixed_string()?;
    if format != FORMAT_PE32_PLUS {
        return Err(Error::FormatMismatch {
            field: "format",
            expected: FORMAT_PE32_PLUS.to_string(),
            actual: format,
        });
    }

    let actual_kind = parser.read_prefixed_string()?;
    if actual_kind != kind.to_string() {
        return Err(Error::FormatMismatch {
            field: "kind",
            expected: kind.to_string(),
            actual: actual_kind,
        });
    }

    let name = parser.read_prefixed_string()?;
    let target = parser.read_le::<u32>()?;
    let has_storage = parser.read_bool()?;
    let storage = parser.read_le::<u32>()?;

    Ok(Symbol {
        name,
        version,
        target: (target != 0).then_some(Rva(target)),
        storage: has_storage.then_some(Rva(storage)),
        body: SymbolBody::Data(DataSymbol {
            is_virtual_table: false,
            is_virtual_table_address: false,
            locator: Locator::Address(0),
        }),
    })
}
