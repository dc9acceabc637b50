#![doc = include_str!("../README.md")]

mod cli;
mod commands;
mod types;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::run::{RunArgs, RunOverrides};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { format } => commands::list::run_list_command(format)?,
        Commands::Run {
            name,
            repeat,
            concurrent,
            threads,
            record,
            seed,
            max_iters,
            verifier,
            timeout,
            verifier_timeout,
            format,
        } => commands::run::run_run_command(RunArgs {
            name,
            repeat,
            concurrent,
            threads,
            record,
            overrides: RunOverrides {
                seed,
                max_iters,
                verifier,
                timeout,
                verifier_timeout,
            },
            format,
        })?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "certa",
            "run",
            "hi_ord_8",
            "--repeat",
            "3",
            "--concurrent",
            "--verifier",
            "dreal",
            "--format",
            "json",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Run {
                name,
                repeat,
                concurrent,
                verifier,
                format,
                ..
            } => {
                assert_eq!(name, "hi_ord_8");
                assert_eq!(repeat, 3);
                assert!(concurrent);
                assert_eq!(verifier, Some(types::VerifierChoice::Dreal));
                assert_eq!(format, types::OutputFormat::Json);
            }
            Commands::List { .. } => panic!("Expected run command"),
        }
    }

    #[test]
    fn unknown_verifier_is_rejected() {
        let parsed = Cli::try_parse_from(["certa", "run", "x", "--verifier", "cvc5"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn catalogue_listing_names_every_entry() {
        let listing = commands::list::catalogue_json();
        let names: Vec<&str> = listing["benchmarks"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|b| b["name"].as_str())
            .collect();
        assert_eq!(names, certa_models::names().collect::<Vec<_>>());
    }
}
