//! Discharges obligations with a decision procedure.
//!
//! Every obligation gets a fresh solver: declarations, box bounds and the
//! single query `domain ∧ ¬requirement` are asserted and a model is asked
//! for. UNSAT proves the obligation; a model is a counterexample; anything
//! else is recorded as unknown and never counted as a proof.

use std::time::{Duration, Instant};

use certa_smt::backends::dreal_backend::DrealSolver;
use certa_smt::backends::interval_backend::{
    IntervalConfig, IntervalSolver, UNKNOWN_BOX_BUDGET, UNKNOWN_PRECISION, UNKNOWN_TIMEOUT,
};
use certa_smt::solver::{Model, SatResult, SmtSolver};
use certa_smt::sorts::SmtSort;
use serde::Serialize;
use tracing::{debug, warn};

use crate::certificate::Obligation;
use crate::cegis::timeout::{query_budget, timeout_unknown_reason};
use crate::config::{CegisConfig, RegionKey, VerifierType};

/// Why a query came back undecided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    Timeout,
    /// The backend could not separate the formula at its precision.
    Numeric,
    Backend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterExample {
    pub point: Vec<f64>,
    pub region: RegionKey,
    pub obligation: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObligationOutcome {
    Verified,
    Counterexample(CounterExample),
    Unknown { reason: UnknownReason, detail: String },
}

impl ObligationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, ObligationOutcome::Verified)
    }

    fn unknown(reason: UnknownReason, detail: impl Into<String>) -> Self {
        ObligationOutcome::Unknown {
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verifier {
    kind: VerifierType,
    timeout_secs: u64,
    precision: f64,
    dreal_command: String,
}

impl Verifier {
    pub fn new(kind: VerifierType, timeout_secs: u64, precision: f64) -> Self {
        Self {
            kind,
            timeout_secs,
            precision,
            dreal_command: "dreal".to_string(),
        }
    }

    pub fn from_config(config: &CegisConfig) -> Self {
        Self::new(config.verifier, config.verifier_timeout_secs, config.precision)
    }

    pub fn with_dreal_command(mut self, command: impl Into<String>) -> Self {
        self.dreal_command = command.into();
        self
    }

    pub fn kind(&self) -> VerifierType {
        self.kind
    }

    /// Checks one obligation over the state variables `names`.
    ///
    /// The query budget is the per-query timeout capped by whatever is left
    /// before `deadline`.
    pub fn check(
        &self,
        obligation: &Obligation,
        names: &[String],
        deadline: Option<Instant>,
    ) -> ObligationOutcome {
        let budget = query_budget(self.timeout_secs, deadline);
        if budget == Some(Duration::ZERO) {
            return ObligationOutcome::unknown(
                UnknownReason::Timeout,
                timeout_unknown_reason(obligation.name),
            );
        }
        let (lower, upper) = &obligation.bounds;
        if lower.iter().zip(upper).any(|(lo, hi)| lo > hi) {
            debug!(obligation = obligation.name, "empty domain box");
            return ObligationOutcome::Verified;
        }

        match self.kind {
            VerifierType::Interval => {
                let config = IntervalConfig {
                    precision: self.precision,
                    timeout: budget,
                    ..IntervalConfig::default()
                };
                run(IntervalSolver::with_config(config), obligation, names)
            }
            VerifierType::Dreal => {
                let solver = DrealSolver::with_command(&self.dreal_command)
                    .timeout(budget)
                    .with_precision(self.precision);
                run(solver, obligation, names)
            }
            #[cfg(feature = "z3")]
            VerifierType::Z3 => {
                use certa_smt::backends::z3_backend::Z3Solver;
                let secs = budget.map_or(0, |b| b.as_secs_f64().ceil().max(1.0) as u64);
                run(Z3Solver::with_timeout_secs(secs), obligation, names)
            }
            #[cfg(not(feature = "z3"))]
            VerifierType::Z3 => ObligationOutcome::unknown(
                UnknownReason::Backend,
                "built without the `z3` feature",
            ),
        }
    }
}

fn query<S: SmtSolver>(
    solver: &mut S,
    obligation: &Obligation,
    names: &[String],
) -> Result<(SatResult, Option<Model>), S::Error> {
    for name in names {
        solver.declare_var(name, &SmtSort::Real)?;
    }
    let (lower, upper) = &obligation.bounds;
    for ((name, lo), hi) in names.iter().zip(lower).zip(upper) {
        if lo.is_finite() && hi.is_finite() {
            solver.bound_var(name, *lo, *hi)?;
        }
    }
    solver.assert(&obligation.query())?;
    let vars: Vec<(&str, &SmtSort)> = names.iter().map(|n| (n.as_str(), &SmtSort::Real)).collect();
    solver.check_sat_with_model(&vars)
}

fn run<S: SmtSolver>(mut solver: S, obligation: &Obligation, names: &[String]) -> ObligationOutcome {
    let result = query(&mut solver, obligation, names);

    match result {
        Ok((SatResult::Unsat, _)) => ObligationOutcome::Verified,
        Ok((SatResult::Sat, Some(model))) => match model.point(names) {
            Some(point) if point.iter().all(|v| v.is_finite()) => {
                ObligationOutcome::Counterexample(CounterExample {
                    point,
                    region: obligation.region,
                    obligation: obligation.name,
                })
            }
            _ => ObligationOutcome::unknown(
                UnknownReason::Backend,
                "model is missing state variables",
            ),
        },
        Ok((SatResult::Sat, None)) => {
            ObligationOutcome::unknown(UnknownReason::Backend, "sat without a model")
        }
        Ok((SatResult::Unknown(detail), _)) => {
            ObligationOutcome::unknown(classify(&detail), detail)
        }
        Err(e) => {
            warn!(obligation = obligation.name, error = %e, "solver failed");
            ObligationOutcome::unknown(UnknownReason::Backend, e.to_string())
        }
    }
}

fn classify(detail: &str) -> UnknownReason {
    let lower = detail.to_ascii_lowercase();
    if lower.starts_with(UNKNOWN_TIMEOUT) || lower.contains("timeout") || lower.contains("canceled")
    {
        UnknownReason::Timeout
    } else if lower.starts_with(UNKNOWN_PRECISION)
        || lower.starts_with(UNKNOWN_BOX_BUDGET)
        || lower.contains("incomplete")
    {
        UnknownReason::Numeric
    } else {
        UnknownReason::Backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certa_smt::terms::SmtTerm;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("x{i}")).collect()
    }

    fn x(i: usize) -> SmtTerm {
        SmtTerm::var(format!("x{i}"))
    }

    fn disc(radius: f64) -> SmtTerm {
        SmtTerm::sum([x(0).powi(2), x(1).powi(2)]).le(SmtTerm::num(radius * radius))
    }

    fn obligation(domain: SmtTerm, requirement: SmtTerm) -> Obligation {
        Obligation {
            name: "positive",
            region: RegionKey::Lie,
            domain,
            requirement,
            bounds: (vec![-1.0, -1.0], vec![1.0, 1.0]),
        }
    }

    #[test]
    fn interval_verifier_proves_a_true_obligation() {
        let verifier = Verifier::new(VerifierType::Interval, 30, 1e-3);
        let ob = obligation(
            disc(1.0),
            SmtTerm::sum([x(0).powi(2), x(1).powi(2), SmtTerm::one()]).gt(SmtTerm::zero()),
        );
        assert_eq!(verifier.check(&ob, &names(2), None), ObligationOutcome::Verified);
    }

    #[test]
    fn interval_verifier_reports_a_counterexample_inside_the_domain() {
        let verifier = Verifier::new(VerifierType::Interval, 30, 1e-3);
        let ob = obligation(disc(1.0), x(0).lt(SmtTerm::num(0.5)));
        match verifier.check(&ob, &names(2), None) {
            ObligationOutcome::Counterexample(cex) => {
                assert_eq!(cex.region, RegionKey::Lie);
                assert_eq!(cex.obligation, "positive");
                assert!(cex.point[0] >= 0.5 - 1e-3);
                assert!(cex.point[0].powi(2) + cex.point[1].powi(2) <= 1.0 + 1e-2);
            }
            other => panic!("Expected counterexample, got: {other:?}"),
        }
    }

    #[test]
    fn expired_deadline_is_unknown_not_verified() {
        let verifier = Verifier::new(VerifierType::Interval, 30, 1e-3);
        let ob = obligation(disc(1.0), SmtTerm::bool(true));
        let past = Instant::now() - Duration::from_secs(1);
        match verifier.check(&ob, &names(2), Some(past)) {
            ObligationOutcome::Unknown { reason, .. } => assert_eq!(reason, UnknownReason::Timeout),
            other => panic!("Expected unknown, got: {other:?}"),
        }
    }

    #[test]
    fn empty_bounding_box_is_vacuously_verified() {
        let verifier = Verifier::new(VerifierType::Interval, 30, 1e-3);
        let mut ob = obligation(disc(1.0), SmtTerm::bool(false));
        ob.bounds = (vec![2.0, -1.0], vec![1.0, 1.0]);
        assert!(verifier.check(&ob, &names(2), None).is_verified());
    }

    #[test]
    fn missing_dreal_binary_is_a_backend_unknown() {
        let verifier = Verifier::new(VerifierType::Dreal, 5, 1e-3)
            .with_dreal_command("certa-test-no-such-dreal-binary");
        let ob = obligation(disc(1.0), x(0).lt(SmtTerm::num(2.0)));
        match verifier.check(&ob, &names(2), None) {
            ObligationOutcome::Unknown { reason, .. } => assert_eq!(reason, UnknownReason::Backend),
            other => panic!("Expected unknown, got: {other:?}"),
        }
    }

    #[cfg(not(feature = "z3"))]
    #[test]
    fn z3_without_feature_is_unknown() {
        let verifier = Verifier::new(VerifierType::Z3, 5, 1e-3);
        let ob = obligation(disc(1.0), SmtTerm::bool(true));
        assert!(matches!(
            verifier.check(&ob, &names(2), None),
            ObligationOutcome::Unknown {
                reason: UnknownReason::Backend,
                ..
            }
        ));
    }

    #[test]
    fn unknown_details_are_classified() {
        assert_eq!(classify("timeout"), UnknownReason::Timeout);
        assert_eq!(classify("canceled"), UnknownReason::Timeout);
        assert_eq!(
            classify("precision: 4 boxes undecided at width 0.001"),
            UnknownReason::Numeric
        );
        assert_eq!(classify("box budget: 10 boxes examined"), UnknownReason::Numeric);
        assert_eq!(classify("(incomplete quantifiers)"), UnknownReason::Numeric);
        assert_eq!(classify("dReal returned unknown"), UnknownReason::Backend);
    }
}
