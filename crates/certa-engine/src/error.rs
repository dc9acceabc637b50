use certa_smt::terms::TermError;
use thiserror::Error;

/// Errors that abort a synthesis run.
///
/// Solver failures, timeouts and undecided queries are not errors: they
/// surface as [`crate::verifier::ObligationOutcome::Unknown`] and the loop
/// carries on. Only problems that make the run meaningless end up here.
#[derive(Debug, Error)]
pub enum CegisError {
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),
    #[error(
        "Sampling exhausted for {set}: produced {produced} of {requested} points after {attempts} proposals"
    )]
    SamplingExhausted {
        set: String,
        requested: usize,
        produced: usize,
        attempts: usize,
    },
    #[error("Dimension mismatch: {0}")]
    Dimension(String),
    #[error("Non-finite value: {0}")]
    NonFinite(String),
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Term error: {0}")]
    Term(#[from] TermError),
}
