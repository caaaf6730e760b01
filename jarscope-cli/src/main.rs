mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })?;

    let cli = Cli::parse();

    // jarscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("jarscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Classes { path, package } => {
            commands::classes::run(path, package.as_deref(), &cli.global)
        }
        Command::Deobfuscate {
            source,
            output,
            rename,
            aggressive,
            disable,
            only,
            stats,
            report,
        } => commands::deobfuscate::run(
            source,
            &commands::deobfuscate::DeobfuscateOptions {
                output,
                rename: *rename,
                aggressive: *aggressive,
                disable,
                only,
                show_stats: *stats,
                report: report.as_deref(),
                global: &cli.global,
            },
        ),
    }
}
