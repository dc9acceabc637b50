//! Run outcome and per-iteration history.

use serde::Serialize;

use crate::candidate::{Candidate, CandidateWeights};
use crate::config::{CertificateType, RegionKey};
use crate::translator::CandidateSymbols;
use crate::verifier::{ObligationOutcome, UnknownReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CegisStatus {
    /// Every obligation was proved for the returned candidate.
    Verified,
    /// The iteration or time budget ran out first.
    Exhausted,
}

impl std::fmt::Display for CegisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CegisStatus::Verified => write!(f, "verified"),
            CegisStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Verified,
    Counterexample,
    Unknown,
    /// Not checked: an earlier obligation failed or the rounded
    /// candidate missed the target loss.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObligationReport {
    pub name: &'static str,
    pub region: RegionKey,
    pub outcome: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_reason: Option<UnknownReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterexample: Option<Vec<f64>>,
    pub elapsed_ms: u64,
}

impl ObligationReport {
    pub(crate) fn new(
        name: &'static str,
        region: RegionKey,
        outcome: &ObligationOutcome,
        elapsed_ms: u64,
    ) -> Self {
        let mut report = Self::skipped(name, region);
        report.elapsed_ms = elapsed_ms;
        match outcome {
            ObligationOutcome::Verified => report.outcome = OutcomeKind::Verified,
            ObligationOutcome::Counterexample(cex) => {
                report.outcome = OutcomeKind::Counterexample;
                report.counterexample = Some(cex.point.clone());
            }
            ObligationOutcome::Unknown { reason, detail } => {
                report.outcome = OutcomeKind::Unknown;
                report.unknown_reason = Some(*reason);
                report.detail = Some(detail.clone());
            }
        }
        report
    }

    pub(crate) fn skipped(name: &'static str, region: RegionKey) -> Self {
        Self {
            name,
            region,
            outcome: OutcomeKind::Skipped,
            unknown_reason: None,
            detail: None,
            counterexample: None,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub train_steps: usize,
    pub train_loss: f64,
    pub fit_converged: bool,
    /// Loss of the rounded candidate.
    pub rounded_loss: f64,
    /// False when the rounded loss missed the target and the candidate
    /// went straight back to refinement.
    pub verification_attempted: bool,
    /// Lowest rounded loss seen so far; never increases.
    pub best_loss: f64,
    pub obligations: Vec<ObligationReport>,
    pub samples_added: usize,
    pub dataset_size: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CegisTermination {
    pub reason: String,
    pub iteration_budget: usize,
    pub iterations_used: usize,
    pub timeout_secs: u64,
    pub elapsed_ms: u64,
    pub reached_iteration_budget: bool,
    pub reached_timeout_budget: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CegisResult {
    pub status: CegisStatus,
    pub certificate: CertificateType,
    pub iterations: usize,
    pub elapsed_ms: u64,
    pub final_loss: f64,
    /// SMT-LIB rendering of the returned certificate.
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<Vec<String>>,
    pub weights: CandidateWeights,
    pub termination: CegisTermination,
    pub history: Vec<IterationReport>,
    #[serde(skip)]
    pub symbols: CandidateSymbols,
    #[serde(skip)]
    pub candidate: Candidate,
}

impl CegisResult {
    pub fn is_verified(&self) -> bool {
        self.status == CegisStatus::Verified
    }
}
