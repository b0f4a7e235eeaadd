//! JSON symbol manifests.
//!
//! A symbols directory holds any number of `*.json` manifests produced by the header scanner. Each
//! one lists functions, variables, virtual tables and virtual functions with the information the
//! runtime resolver needs to find them:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "functions": [{ "name": "?tick@Level@@QEAAXXZ", "address": "0x1A2B30" }],
//!   "variables": [{ "name": "?instance@Game@@2PEAV1@EA", "signature": "48 8B 05 ? ? ? ?", "is_vaddress": false }],
//!   "vtables": [{ "name": "??_7Actor@@6B@", "address": "4F1A2B0" }],
//!   "virtual_functions": [{ "name": "??1Actor@@UEAA@XZ", "vtable": "this", "index": 0, "is_vdtor": true }]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use modtweak::SymbolDescriptor;
use serde::Deserialize;

use crate::commands::common::{collect_manifests, file_display_name};

/// The only manifest layout understood so far.
pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub functions: Vec<FunctionEntry>,
    #[serde(default)]
    pub variables: Vec<VariableEntry>,
    #[serde(default)]
    pub vtables: Vec<VirtualTableEntry>,
    #[serde(default)]
    pub virtual_functions: Vec<VirtualFunctionEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionEntry {
    #[serde(default)]
    pub name: String,
    pub address: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VariableEntry {
    #[serde(default)]
    pub name: String,
    pub address: Option<String>,
    pub signature: Option<String>,
    #[serde(default)]
    pub is_vaddress: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct VirtualTableEntry {
    #[serde(default)]
    pub name: String,
    pub address: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VirtualFunctionEntry {
    #[serde(default)]
    pub name: String,
    pub vtable: Option<String>,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub is_vdtor: bool,
}

/// Parse a hex address, with or without a `0x` prefix.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// Apply the address or signature of an entry; a signature takes precedence.
///
/// Returns `None` (and warns) if the address cannot be parsed.
fn locate(
    descriptor: SymbolDescriptor,
    address: Option<&str>,
    signature: Option<&str>,
) -> Option<SymbolDescriptor> {
    if let Some(signature) = signature {
        return Some(descriptor.with_signature(signature));
    }
    match address.filter(|a| !a.trim().is_empty()) {
        Some(text) => match parse_address(text) {
            Some(address) => Some(descriptor.with_address(address)),
            None => {
                log::warn!("Skipping '{}': invalid address '{text}'", descriptor.name);
                None
            }
        },
        None => Some(descriptor),
    }
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Flatten the manifest into descriptors, dropping entries without a name.
    ///
    /// Entries are not validated here; that happens when the patcher converts them.
    pub fn into_descriptors(self) -> Vec<SymbolDescriptor> {
        let mut descriptors = Vec::new();

        for function in self.functions.into_iter().filter(|f| !f.name.is_empty()) {
            descriptors.extend(locate(
                SymbolDescriptor::function(function.name),
                function.address.as_deref(),
                function.signature.as_deref(),
            ));
        }

        for variable in self.variables.into_iter().filter(|v| !v.name.is_empty()) {
            let mut descriptor = SymbolDescriptor::data(variable.name);
            if variable.is_vaddress {
                descriptor = descriptor.virtual_table_address();
            }
            descriptors.extend(locate(
                descriptor,
                variable.address.as_deref(),
                variable.signature.as_deref(),
            ));
        }

        for vtable in self.vtables.into_iter().filter(|v| !v.name.is_empty()) {
            descriptors.extend(locate(
                SymbolDescriptor::virtual_table(vtable.name),
                vtable.address.as_deref(),
                vtable.signature.as_deref(),
            ));
        }

        for function in self.virtual_functions.into_iter().filter(|f| !f.name.is_empty()) {
            let mut descriptor = SymbolDescriptor::function(function.name)
                .with_virtual(function.index, function.vtable.filter(|t| !t.is_empty()));
            if function.is_vdtor {
                descriptor = descriptor.destructor();
            }
            descriptors.push(descriptor);
        }

        descriptors
    }
}

/// Load every manifest under `dir` and concatenate their symbols in file-name order.
///
/// Manifests with an unknown `format_version` are skipped with a warning; malformed JSON fails.
pub fn load_directory(dir: &Path) -> anyhow::Result<Vec<SymbolDescriptor>> {
    let mut descriptors = Vec::new();

    for path in collect_manifests(dir)? {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        let manifest = Manifest::from_json(&text)
            .with_context(|| format!("failed to parse manifest: {}", path.display()))?;

        if manifest.format_version != FORMAT_VERSION {
            log::warn!(
                "Skipping {}: unsupported format_version {}",
                file_display_name(&path),
                manifest.format_version
            );
            continue;
        }

        let symbols = manifest.into_descriptors();
        log::debug!("{}: {} symbols", file_display_name(&path), symbols.len());
        descriptors.extend(symbols);
    }

    log::info!("Loaded {} symbols from {}", descriptors.len(), dir.display());
    Ok(descriptors)
}
