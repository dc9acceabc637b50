//! Shared types used across CLI commands and tests.

use certa_engine::config::VerifierType;
use clap::ValueEnum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum VerifierChoice {
    Interval,
    Z3,
    Dreal,
}

impl From<VerifierChoice> for VerifierType {
    fn from(choice: VerifierChoice) -> Self {
        match choice {
            VerifierChoice::Interval => VerifierType::Interval,
            VerifierChoice::Z3 => VerifierType::Z3,
            VerifierChoice::Dreal => VerifierType::Dreal,
        }
    }
}
