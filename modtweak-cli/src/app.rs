use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// modtweak - retarget PE32+ module imports to a runtime importer
#[derive(Debug, Parser)]
#[command(name = "modtweak", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Remove the host module from the import directory and embed the symbol records.
    Patch {
        /// Path to the module to patch.
        #[arg(short, long, value_name = "FILE")]
        module: PathBuf,

        /// Directory searched recursively for *.json symbol manifests.
        #[arg(short, long, value_name = "DIR")]
        symbols: PathBuf,

        /// Write the patched module here instead of replacing the input (no backup is made).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Name prefix of the imported module to retarget (case-insensitive).
        #[arg(short, long, value_name = "PREFIX")]
        target: Option<String>,

        /// Fail on the first invalid symbol instead of skipping it.
        #[arg(long)]
        strict: bool,
    },

    /// Restore the original import directory and remove the patch sections.
    Unpatch {
        /// Path to the patched module.
        #[arg(short, long, value_name = "FILE")]
        module: PathBuf,

        /// Write the restored module here instead of replacing the input (no backup is made).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show the sections and the embedded symbol records of a module.
    Inspect {
        /// Path to the module.
        #[arg(short, long, value_name = "FILE")]
        module: PathBuf,
    },
}
