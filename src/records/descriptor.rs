//! Flat symbol descriptions supplied by callers.
//!
//! Symbol lists are produced upstream from header files and arrive as flat records with optional
//! fields. [`SymbolDescriptor`] mirrors that shape; converting it into a [`Symbol`] is where the
//! combinations that cannot be expressed in a record are rejected.

use crate::{
    records::symbol::{DataSymbol, FunctionSymbol, Locator, Resolution, Symbol, SymbolKind},
    Error, Result,
};

/// Virtual table name used when a virtual function does not name one.
pub const DEFAULT_VIRTUAL_TABLE: &str = "this";

/// An unvalidated description of one symbol.
///
/// # Examples
///
/// ```rust
/// use modtweak::records::{Symbol, SymbolDescriptor};
///
/// let descriptor = SymbolDescriptor::function("??1Actor@@UEAA@XZ")
///     .with_virtual(0, None)
///     .destructor();
/// let symbol = Symbol::try_from(&descriptor)?;
/// assert!(symbol.needs_storage());
///
/// let invalid = SymbolDescriptor::data("?g@@3HA")
///     .with_address(0x10)
///     .with_signature("48 8B");
/// assert!(Symbol::try_from(&invalid).is_err());
/// # Ok::<(), modtweak::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDescriptor {
    /// Link-time (mangled) name
    pub name: String,
    /// Function or data
    pub kind: SymbolKind,
    /// Absolute address, exclusive with `signature`
    pub address: Option<u64>,
    /// Byte pattern, exclusive with `address`
    pub signature: Option<String>,
    /// Index into a virtual table, functions only
    pub virtual_index: Option<u32>,
    /// Name of the virtual table `virtual_index` refers to
    pub virtual_table: Option<String>,
    /// The function is a destructor
    pub is_destructor: bool,
    /// The data symbol is a virtual table
    pub is_virtual_table: bool,
    /// The data symbol's address is a virtual table pointer
    pub is_virtual_table_address: bool,
}

impl SymbolDescriptor {
    fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        SymbolDescriptor {
            name: name.into(),
            kind,
            address: None,
            signature: None,
            virtual_index: None,
            virtual_table: None,
            is_destructor: false,
            is_virtual_table: false,
            is_virtual_table_address: false,
        }
    }

    /// Describe a function.
    pub fn function(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Function)
    }

    /// Describe a data symbol.
    pub fn data(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Data)
    }

    /// Describe a virtual table.
    pub fn virtual_table(name: impl Into<String>) -> Self {
        let mut descriptor = Self::new(name, SymbolKind::Data);
        descriptor.is_virtual_table = true;
        descriptor
    }

    /// Locate the symbol at a fixed address.
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    /// Locate the symbol by byte pattern.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Resolve the function through a virtual table slot.
    #[must_use]
    pub fn with_virtual(mut self, index: u32, table: Option<String>) -> Self {
        self.virtual_index = Some(index);
        self.virtual_table = table;
        self
    }

    /// Mark the function as a destructor.
    #[must_use]
    pub fn destructor(mut self) -> Self {
        self.is_destructor = true;
        self
    }

    /// Mark the data symbol's address as a virtual table pointer.
    #[must_use]
    pub fn virtual_table_address(mut self) -> Self {
        self.is_virtual_table_address = true;
        self
    }

    fn reject(&self, reason: &str) -> Error {
        Error::InvalidSymbol {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn locator(&self) -> Result<Option<Locator>> {
        match (self.address, &self.signature) {
            (Some(_), Some(_)) => Err(self.reject("address and signature are mutually exclusive")),
            (Some(address), None) => Ok(Some(Locator::Address(address))),
            (None, Some(signature)) => Ok(Some(Locator::Signature(signature.clone()))),
            (None, None) => Ok(None),
        }
    }
}

impl TryFrom<&SymbolDescriptor> for Symbol {
    type Error = Error;

    fn try_from(descriptor: &SymbolDescriptor) -> Result<Self> {
        if descriptor.name.is_empty() {
            return Err(descriptor.reject("name is empty"));
        }

        let locator = descriptor.locator()?;

        match descriptor.kind {
            SymbolKind::Function => {
                if descriptor.is_virtual_table || descriptor.is_virtual_table_address {
                    return Err(descriptor.reject("virtual table flags only apply to data"));
                }

                let resolution = match (descriptor.virtual_index, locator) {
                    (Some(_), Some(_)) => {
                        return Err(descriptor
                            .reject("a virtual index excludes an address or signature"));
                    }
                    (Some(index), None) => Resolution::Virtual {
                        index,
                        table: descriptor
                            .virtual_table
                            .clone()
                            .filter(|table| !table.is_empty())
                            .unwrap_or_else(|| DEFAULT_VIRTUAL_TABLE.to_string()),
                    },
                    (None, Some(Locator::Address(address))) => Resolution::Address(address),
                    (None, Some(Locator::Signature(signature))) => Resolution::Signature(signature),
                    (None, None) => {
                        return Err(descriptor
                            .reject("needs an address, a signature or a virtual index"));
                    }
                };

                if descriptor.virtual_table.is_some() && descriptor.virtual_index.is_none() {
                    return Err(descriptor.reject("virtual table given without a virtual index"));
                }

                Ok(Symbol::function(
                    descriptor.name.clone(),
                    FunctionSymbol {
                        is_destructor: descriptor.is_destructor,
                        resolution,
                    },
                ))
            }
            SymbolKind::Data => {
                if descriptor.virtual_index.is_some() || descriptor.virtual_table.is_some() {
                    return Err(descriptor.reject("data symbols have no virtual index"));
                }
                if descriptor.is_destructor {
                    return Err(descriptor.reject("only functions can be destructors"));
                }
                let Some(locator) = locator else {
                    return Err(descriptor.reject("needs an address or a signature"));
                };

                Ok(Symbol::data(
                    descriptor.name.clone(),
                    DataSymbol {
                        is_virtual_table: descriptor.is_virtual_table,
                        is_virtual_table_address: descriptor.is_virtual_table_address,
                        locator,
                    },
                ))
            }
        }
    }
}
