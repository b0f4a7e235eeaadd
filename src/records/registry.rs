//! Dispatch from record identifiers to decoders.
//!
//! A symbol record announces its layout through its leading `(version, format, kind)` triple.
//! [`SymbolRegistry`] maps each known triple to the function that decodes it, so a header can
//! hold records of different kinds and versions side by side. The set of layouts is fixed at
//! compile time and provided by [`SymbolRegistry::builtin`]; [`SymbolRegistry::register`] exists
//! for layouts added by embedders and refuses to replace an existing decoder.

use std::{collections::HashMap, fmt};

use crate::{
    file::parser::Parser,
    records::symbol::{
        Symbol, SymbolKind, SymbolType, DATA_LEGACY_VERSION, DATA_VERSION, FORMAT_PE32_PLUS,
        FUNCTION_VERSION,
    },
    Error, Result,
};

/// Decodes one symbol record, starting at its version field.
pub type SymbolDecoder = fn(&mut Parser) -> Result<Symbol>;

/// Lookup table from record triple to decoder.
///
/// # Examples
///
/// ```rust
/// use modtweak::records::{Symbol, SymbolDescriptor, SymbolRegistry};
/// use modtweak::{Parser, Writer};
///
/// let symbol = Symbol::try_from(&SymbolDescriptor::data("?g@@3HA").with_address(0x40))?;
/// let mut writer = Writer::new();
/// symbol.write_to(&mut writer)?;
/// let bytes = writer.into_inner();
///
/// let registry = SymbolRegistry::builtin();
/// assert_eq!(registry.decode(&mut Parser::new(&bytes))?, symbol);
/// # Ok::<(), modtweak::Error>(())
/// ```
#[derive(Clone)]
pub struct SymbolRegistry {
    decoders: HashMap<(u32, String, String), SymbolDecoder>,
}

impl fmt::Debug for SymbolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl SymbolRegistry {
    /// A registry without any decoders.
    #[must_use]
    pub fn empty() -> Self {
        SymbolRegistry {
            decoders: HashMap::new(),
        }
    }

    /// A registry holding every record layout this crate writes or reads.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let builtin: [(u32, SymbolKind, SymbolDecoder); 3] = [
            (FUNCTION_VERSION, SymbolKind::Function, Symbol::read_function_v1),
            (DATA_LEGACY_VERSION, SymbolKind::Data, Symbol::read_data_v1),
            (DATA_VERSION, SymbolKind::Data, Symbol::read_data_v2),
        ];

        for (version, kind, decoder) in builtin {
            registry.decoders.insert(
                (version, FORMAT_PE32_PLUS.to_string(), kind.to_string()),
                decoder,
            );
        }

        registry
    }

    /// Add a decoder for a new record triple.
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateRecordType`] if the triple already has a decoder; the
    /// existing decoder is kept.
    pub fn register(
        &mut self,
        version: u32,
        format: &str,
        kind: &str,
        decoder: SymbolDecoder,
    ) -> Result<()> {
        let key = (version, format.to_string(), kind.to_string());
        if self.decoders.contains_key(&key) {
            return Err(Error::DuplicateRecordType {
                version,
                format: format.to_string(),
                kind: kind.to_string(),
            });
        }

        self.decoders.insert(key, decoder);
        Ok(())
    }

    /// `true` if a decoder exists for the triple.
    #[must_use]
    pub fn contains(&self, version: u32, format: &str, kind: &str) -> bool {
        self.decoders
            .contains_key(&(version, format.to_string(), kind.to_string()))
    }

    /// Number of registered record layouts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// `true` if no decoder is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Peek the next record's triple and decode it with the matching decoder.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnregisteredSymbolType`] for an unknown triple, or whatever the
    /// decoder returns. The parser position is unchanged on error.
    pub fn decode(&self, parser: &mut Parser) -> Result<Symbol> {
        let SymbolType {
            version,
            format,
            kind,
        } = SymbolType::peek(parser)?;

        match self.decoders.get(&(version, format.clone(), kind.clone())) {
            Some(decoder) => decoder(parser),
            None => Err(Error::UnregisteredSymbolType {
                version,
                format,
                kind,
            }),
        }
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
