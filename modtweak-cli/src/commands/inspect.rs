use std::path::Path;

use anyhow::Context;
use modtweak::{
    image::DataDirectoryType,
    patch::sections::CustomSection,
    records::{Locator, Resolution, SymbolBody},
    PatchOptions, Patcher, Symbol,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_module},
    output::{hex, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct SectionInfo {
    name: String,
    rva: String,
    virtual_size: u32,
    raw_offset: String,
    raw_size: u32,
    characteristics: String,
    custom: bool,
}

#[derive(Debug, Serialize)]
struct SymbolInfo {
    name: String,
    kind: String,
    version: u32,
    slot: Option<String>,
    storage: Option<String>,
    locate: String,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    file: String,
    import_directory: String,
    sections: Vec<SectionInfo>,
    patched: bool,
    original_import_directory: Option<String>,
    import_count: Option<u32>,
    symbols: Vec<SymbolInfo>,
}

/// How the runtime resolver will find the symbol, in one line.
fn describe(symbol: &Symbol) -> String {
    match &symbol.body {
        SymbolBody::Function(function) => {
            let mut text = match &function.resolution {
                Resolution::Address(address) => format!("address {}", hex(*address)),
                Resolution::Signature(signature) => format!("signature \"{signature}\""),
                Resolution::Virtual { index, table } => format!("virtual {table}[{index}]"),
            };
            if function.is_destructor {
                text.push_str(", destructor");
            }
            text
        }
        SymbolBody::Data(data) => {
            let mut text = match &data.locator {
                Locator::Address(address) => format!("address {}", hex(*address)),
                Locator::Signature(signature) => format!("signature \"{signature}\""),
            };
            if data.is_virtual_table {
                text.push_str(", vtable");
            }
            if data.is_virtual_table_address {
                text.push_str(", vtable pointer");
            }
            text
        }
    }
}

pub fn run(module: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let image = load_module(module)?;

    let sections = image
        .sections()
        .iter()
        .map(|section| {
            let name = section.name();
            SectionInfo {
                custom: CustomSection::from_name(&name).is_some(),
                name,
                rva: section.virtual_address.to_string(),
                virtual_size: section.virtual_size,
                raw_offset: hex(u64::from(section.pointer_to_raw_data)),
                raw_size: section.size_of_raw_data,
                characteristics: format!("0x{:08X}", section.characteristics),
            }
        })
        .collect();
    let import_directory = image.data_directory(DataDirectoryType::ImportTable)?.to_string();

    let patcher = Patcher::new(image, PatchOptions::new());
    let header = patcher
        .header()
        .with_context(|| format!("failed to decode embedded header: {}", module.display()))?;

    let output = InspectOutput {
        file: module.display().to_string(),
        import_directory,
        sections,
        patched: header.is_some(),
        original_import_directory: header
            .as_ref()
            .map(|h| h.old_import_directory.to_string()),
        import_count: header.as_ref().map(|h| h.import_count),
        symbols: header
            .iter()
            .flat_map(|h| &h.symbols)
            .map(|symbol| SymbolInfo {
                name: symbol.name.clone(),
                kind: symbol.kind().to_string(),
                version: symbol.version,
                slot: symbol.target.map(|rva| rva.to_string()),
                storage: symbol.storage.map(|rva| rva.to_string()),
                locate: describe(symbol),
            })
            .collect(),
    };

    print_output(&output, opts, |out| {
        println!("{}", file_display_name(module));
        println!("  Import directory:  {}", out.import_directory);

        println!("\nSections ({}):", out.sections.len());
        let mut tw = TabWriter::new(&[
            ("Name", Align::Left),
            ("RVA", Align::Left),
            ("VSize", Align::Right),
            ("Raw", Align::Left),
            ("RawSize", Align::Right),
            ("Flags", Align::Left),
            ("", Align::Left),
        ])
        .indent("  ");
        for section in &out.sections {
            tw.row(vec![
                section.name.clone(),
                section.rva.clone(),
                section.virtual_size.to_string(),
                section.raw_offset.clone(),
                section.raw_size.to_string(),
                section.characteristics.clone(),
                if section.custom { "patch" } else { "" }.to_string(),
            ]);
        }
        tw.print();

        let (Some(original), Some(count)) = (&out.original_import_directory, out.import_count)
        else {
            println!("\nNot patched.");
            return;
        };

        println!("\nPatched:");
        println!("  Original imports:  {original}");
        println!("  Import count:      {count}");
        println!("\nSymbols ({}):", out.symbols.len());
        let mut tw = TabWriter::new(&[
            ("Name", Align::Left),
            ("Kind", Align::Left),
            ("Ver", Align::Right),
            ("Slot", Align::Left),
            ("Storage", Align::Left),
            ("Located by", Align::Left),
        ])
        .indent("  ");
        for symbol in &out.symbols {
            tw.row(vec![
                symbol.name.clone(),
                symbol.kind.clone(),
                symbol.version.to_string(),
                symbol.slot.clone().unwrap_or_else(|| "-".to_string()),
                symbol.storage.clone().unwrap_or_else(|| "-".to_string()),
                symbol.locate.clone(),
            ]);
        }
        tw.print();
    })
}
