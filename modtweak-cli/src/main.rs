mod app;
mod commands;
mod manifest;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() {
    let cli = Cli::parse();

    // modtweak info+ on stderr; --verbose enables debug, --json keeps only warnings; RUST_LOG overrides
    let level = if cli.global.verbose {
        log::LevelFilter::Debug
    } else if cli.global.json {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("modtweak", level)
        .filter_module("modtweak_cli", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    if let Err(error) = run(&cli) {
        if error.is::<commands::common::Cancelled>() {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
        log::error!("{error:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    // Only flag the request; exiting here would skip the cleanup of a commit in progress.
    ctrlc::set_handler(commands::common::cancel).context("failed to set Ctrl+C handler")?;

    match &cli.command {
        Command::Patch {
            module,
            symbols,
            output,
            target,
            strict,
        } => commands::patch::run(
            module,
            symbols,
            &commands::patch::PatchArgs {
                output: output.as_deref(),
                target: target.as_deref(),
                strict: *strict,
                global: &cli.global,
            },
        ),
        Command::Unpatch { module, output } => {
            commands::unpatch::run(module, output.as_deref(), &cli.global)
        }
        Command::Inspect { module } => commands::inspect::run(module, &cli.global),
    }
}
