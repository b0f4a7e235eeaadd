use std::path::Path;

use anyhow::Context;
use modtweak::{patch::commit::commit_image, PatchOptions, PatchOutcome, Patcher, SymbolPolicy};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{ensure_exists, ensure_not_cancelled, file_display_name, load_module},
    manifest,
    output::print_output,
};

#[derive(Debug, Serialize)]
struct PatchSummary {
    file: String,
    output: Option<String>,
    patched: bool,
    skipped: Option<String>,
    module: Option<String>,
    supplied: usize,
    mapped: usize,
    shadow: usize,
    with_storage: usize,
    import_count: u32,
    replaced: Option<usize>,
    unmatched: Vec<String>,
    rejected: Vec<String>,
    storage: Option<String>,
    header: Option<String>,
    import_directory: Option<String>,
}

pub struct PatchArgs<'a> {
    pub output: Option<&'a Path>,
    pub target: Option<&'a str>,
    pub strict: bool,
    pub global: &'a GlobalOptions,
}

pub fn run(module: &Path, symbols: &Path, args: &PatchArgs) -> anyhow::Result<()> {
    ensure_exists(module, "module")?;
    ensure_exists(symbols, "symbols directory")?;

    let descriptors = manifest::load_directory(symbols)?;

    let mut options = PatchOptions::new();
    if let Some(target) = args.target {
        options = options.with_target_module(target);
    }
    if args.strict {
        options = options.with_symbol_policy(SymbolPolicy::Abort);
    }
    if let Some(output) = args.output {
        options = options.with_output(output);
    }

    ensure_not_cancelled()?;

    let mut patcher = Patcher::new(load_module(module)?, options);
    let outcome = patcher
        .patch(&descriptors)
        .with_context(|| format!("failed to patch module: {}", module.display()))?;

    if let PatchOutcome::Patched(_) = &outcome {
        ensure_not_cancelled()?;
        let commit = patcher.options().commit.clone();
        commit_image(module, patcher.into_image().data(), &commit)
            .with_context(|| format!("failed to write module: {}", module.display()))?;
    }

    let mut summary = PatchSummary {
        file: module.display().to_string(),
        output: None,
        patched: false,
        skipped: None,
        module: None,
        supplied: descriptors.len(),
        mapped: 0,
        shadow: 0,
        with_storage: 0,
        import_count: 0,
        replaced: None,
        unmatched: Vec::new(),
        rejected: Vec::new(),
        storage: None,
        header: None,
        import_directory: None,
    };

    match outcome {
        PatchOutcome::Patched(report) => {
            summary.output = Some(args.output.unwrap_or(module).display().to_string());
            summary.patched = true;
            summary.module = Some(report.module);
            summary.mapped = report.mapped;
            summary.shadow = report.shadow;
            summary.with_storage = report.with_storage;
            summary.import_count = report.import_count;
            summary.replaced = report.replaced;
            summary.unmatched = report.unmatched;
            summary.rejected = report.rejected;
            summary.storage = Some(report.storage.to_string());
            summary.header = Some(report.header.to_string());
            summary.import_directory = Some(report.import_directory.to_string());
        }
        PatchOutcome::Skipped(reason) => {
            log::warn!("{} left unchanged: {reason}", file_display_name(module));
            summary.skipped = Some(reason.to_string());
        }
    }

    print_output(&summary, args.global, |s| {
        if !s.patched {
            println!("{}: not patched", file_display_name(module));
            return;
        }

        println!(
            "{}: removed import of {}",
            file_display_name(module),
            s.module.as_deref().unwrap_or_default()
        );
        println!("  Symbols supplied:  {}", s.supplied);
        println!("  Imports mapped:    {} of {}", s.mapped, s.import_count);
        println!("  Virtual tables:    {}", s.shadow);
        println!("  With storage:      {}", s.with_storage);
        if let Some(replaced) = s.replaced {
            println!("  Replaced patch:    {replaced} symbols");
        }
        if !s.rejected.is_empty() {
            println!("  Rejected:          {}", s.rejected.join(", "));
        }
        if let (Some(storage), Some(header), Some(imports)) =
            (&s.storage, &s.header, &s.import_directory)
        {
            println!("  .rtis at {storage}, .rtih at {header}");
            println!("  Import directory:  {imports}");
        }
        if let Some(output) = &s.output {
            println!("  Written to:        {output}");
        }
    })
}
