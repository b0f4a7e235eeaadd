use std::path::Path;

use anyhow::Context;
use modtweak::{patch::commit::commit_image, PatchOptions, Patcher, UnpatchOutcome};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{ensure_not_cancelled, file_display_name, load_module},
    output::print_output,
};

#[derive(Debug, Serialize)]
struct UnpatchSummary {
    file: String,
    output: Option<String>,
    restored: bool,
    symbols: usize,
    import_directory: Option<String>,
}

pub fn run(module: &Path, output: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let mut options = PatchOptions::new();
    if let Some(output) = output {
        options = options.with_output(output);
    }

    let mut patcher = Patcher::new(load_module(module)?, options);
    let outcome = patcher
        .unpatch()
        .with_context(|| format!("failed to unpatch module: {}", module.display()))?;

    if let UnpatchOutcome::Restored { .. } = &outcome {
        ensure_not_cancelled()?;
        let commit = patcher.options().commit.clone();
        commit_image(module, patcher.into_image().data(), &commit)
            .with_context(|| format!("failed to write module: {}", module.display()))?;
    }

    let summary = match outcome {
        UnpatchOutcome::Restored { header } => UnpatchSummary {
            file: module.display().to_string(),
            output: Some(output.unwrap_or(module).display().to_string()),
            restored: true,
            symbols: header.symbols.len(),
            import_directory: Some(header.old_import_directory.to_string()),
        },
        UnpatchOutcome::NotPatched => UnpatchSummary {
            file: module.display().to_string(),
            output: None,
            restored: false,
            symbols: 0,
            import_directory: None,
        },
    };

    print_output(&summary, opts, |s| {
        let name = file_display_name(module);
        match (&s.output, &s.import_directory) {
            (Some(output), Some(imports)) => {
                println!("{name}: removed {} embedded symbols", s.symbols);
                println!("  Import directory:  {imports}");
                println!("  Written to:        {output}");
            }
            _ => println!("{name}: not patched"),
        }
    })
}
