use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::common::STDIN;
use jarscope::deobfuscation::PassKind;

/// jarscope - JVM class archive inspection and deobfuscation
#[derive(Debug, Parser)]
#[command(name = "jarscope", version, about, long_about = None)]
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
    /// List the classes of a jar with their super class and member counts.
    Classes {
        /// Path to the jar file, or `-` to read it from standard input.
        #[arg(value_name = "FILE", value_parser = existing_file)]
        path: PathBuf,

        /// Show only classes whose name starts with this prefix.
        #[arg(long, value_name = "PREFIX")]
        package: Option<String>,
    },

    /// Deobfuscate a jar and write the result.
    Deobfuscate {
        /// Path to the input jar, or `-` to read it from standard input.
        #[arg(short, long, value_name = "FILE", value_parser = existing_file)]
        source: PathBuf,

        /// Path of the jar to write.
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Rename short obfuscated identifiers to placeholders.
        #[arg(long)]
        rename: bool,

        /// Enable every pass, including block straightening and renaming.
        #[arg(long)]
        aggressive: bool,

        /// Disable a pass by name (repeatable), e.g. `--disable goto`.
        #[arg(long, value_name = "PASS")]
        disable: Vec<PassKind>,

        /// Run only the named passes (repeatable).
        #[arg(long, value_name = "PASS", conflicts_with_all = ["aggressive", "disable"])]
        only: Vec<PassKind>,

        /// Print per-pass statistics.
        #[arg(long)]
        stats: bool,

        /// Write a JSON report of the run.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if value == STDIN || path.is_file() {
        Ok(path)
    } else {
        Err(format!("no such file: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_missing_source_rejected() {
        let result = Cli::try_parse_from([
            "jarscope",
            "deobfuscate",
            "--source",
            "/nonexistent/jarscope/in.jar",
            "--output",
            "out.jar",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stdin_source_accepted() {
        let cli = Cli::try_parse_from(["jarscope", "classes", "-"]).unwrap();
        match cli.command {
            Command::Classes { path, .. } => assert_eq!(path, PathBuf::from("-")),
            Command::Deobfuscate { .. } => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_disable_parses_pass_names() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let cli = Cli::try_parse_from([
            "jarscope",
            "--json",
            "deobfuscate",
            "--source",
            manifest,
            "--output",
            "out.jar",
            "--disable",
            "goto",
            "--disable",
            "opaque_predicates",
        ])
        .unwrap();

        assert!(cli.global.json);
        match cli.command {
            Command::Deobfuscate { disable, .. } => {
                assert_eq!(disable, vec![PassKind::Goto, PassKind::OpaquePredicates]);
            }
            Command::Classes { .. } => panic!("wrong subcommand"),
        }
    }
}
