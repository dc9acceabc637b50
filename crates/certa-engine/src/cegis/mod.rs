//! The counterexample-guided synthesis loop.
//!
//! ```text
//! INIT → TRAIN → TRANSLATE → VERIFY ─┬→ VERIFIED
//!          ↑                          ├→ REFINE ─┐
//!          └──────────────────────────┼──────────┘
//!                                     └→ EXHAUSTED
//! ```
//!
//! A [`Cegis`] owns all state of one run; independent runs construct
//! their own instance and share nothing mutable.

pub(crate) mod timeout;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use certa_smt::backends::smtlib_printer::to_smtlib;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::candidate::Candidate;
use crate::certificate::Certificate;
use crate::config::CegisConfig;
use crate::counterexample::Refiner;
use crate::data::Dataset;
use crate::error::CegisError;
use crate::learner::Learner;
use crate::result::{
    CegisResult, CegisStatus, CegisTermination, IterationReport, ObligationReport,
};
use crate::system::System;
use crate::translator::{CandidateSymbols, Translator};
use crate::verifier::{ObligationOutcome, Verifier};

use self::timeout::{deadline_exceeded, deadline_from_timeout_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CegisPhase {
    Init,
    Train,
    Translate,
    Verify,
    Refine,
    Verified,
    Exhausted,
}

impl fmt::Display for CegisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CegisPhase::Init => "init",
            CegisPhase::Train => "train",
            CegisPhase::Translate => "translate",
            CegisPhase::Verify => "verify",
            CegisPhase::Refine => "refine",
            CegisPhase::Verified => "verified",
            CegisPhase::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// A rounded candidate together with what was computed from it.
struct Snapshot {
    candidate: Candidate,
    symbols: CandidateSymbols,
    loss: f64,
}

pub struct Cegis {
    config: CegisConfig,
    system: Arc<dyn System>,
    certificate: Certificate,
    learner: Learner,
    translator: Translator,
    verifier: Verifier,
    refiner: Refiner,
    phase: CegisPhase,
}

impl Cegis {
    /// Validates `config` against `system`. Invalid configurations are
    /// rejected here, before any sampling or training.
    pub fn new(config: CegisConfig, system: Arc<dyn System>) -> Result<Self, CegisError> {
        config.validate(system.as_ref())?;
        let certificate = Certificate::from_config(&config);
        let anchored = certificate.anchored();
        Ok(Self {
            learner: Learner::new(config.learner.clone(), config.time_domain, anchored),
            translator: Translator::from_config(&config, anchored),
            verifier: Verifier::from_config(&config),
            refiner: Refiner::from_config(&config),
            certificate,
            system,
            config,
            phase: CegisPhase::Init,
        })
    }

    /// Replaces the verifier built from the configuration, e.g. to point
    /// at a non-default dReal binary.
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &CegisConfig {
        &self.config
    }

    pub fn phase(&self) -> CegisPhase {
        self.phase
    }

    fn enter(&mut self, phase: CegisPhase) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    /// Runs the loop to completion.
    ///
    /// Ends in [`CegisStatus::Verified`] or [`CegisStatus::Exhausted`];
    /// errors are reserved for problems that make the run meaningless
    /// (sampling failure at INIT, non-finite weights).
    pub fn solve(&mut self) -> Result<CegisResult, CegisError> {
        let started = Instant::now();
        let deadline = deadline_from_timeout_secs(self.config.timeout_secs);
        let system = Arc::clone(&self.system);

        self.enter(CegisPhase::Init);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut data = Dataset::sample(&self.config.data, self.config.n_vars, &mut rng)?;
        let mut candidate = Candidate::init(&self.config, &mut rng)?;
        info!(
            certificate = %self.config.certificate,
            system = system.name(),
            verifier = %self.verifier.kind(),
            samples = data.total(),
            parameters = candidate.param_count(),
            "Starting CEGIS"
        );

        let mut history: Vec<IterationReport> = Vec::new();
        let mut best: Option<Snapshot> = None;
        let mut verified: Option<Snapshot> = None;
        let mut iteration = 0;

        let reason = loop {
            if iteration >= self.config.cegis_max_iters {
                break "iteration budget exhausted";
            }
            if deadline_exceeded(deadline) {
                break "timeout";
            }
            iteration += 1;
            let iteration_started = Instant::now();

            self.enter(CegisPhase::Train);
            let fit = self
                .learner
                .fit(&mut candidate, &self.certificate, system.as_ref(), &data)?;
            if !candidate.all_finite() {
                return Err(CegisError::NonFinite(format!(
                    "candidate weights after iteration {iteration}"
                )));
            }
            if fit.converged {
                info!(
                    iteration,
                    steps = fit.steps,
                    loss = fit.final_loss,
                    "Training reached target"
                );
            } else {
                info!(
                    iteration,
                    steps = fit.steps,
                    loss = fit.final_loss,
                    "Training stopped above target loss"
                );
            }

            self.enter(CegisPhase::Translate);
            self.translator.project(&mut candidate)?;
            let rounded = self
                .learner
                .evaluate(&candidate, &self.certificate, system.as_ref(), &data)?;
            let target = self.learner.config().target_loss;
            let within_target = rounding_kept_the_fit(fit.final_loss, rounded.total, target);
            let symbols = self.translator.translate(&candidate, system.as_ref())?;
            let obligations = self.certificate.obligations(&symbols, &self.config.domains)?;
            info!(
                iteration,
                rounded_loss = rounded.total,
                obligations = obligations.len(),
                "Candidate translated"
            );

            let mut reports = Vec::with_capacity(obligations.len());
            let mut failure = None;
            if within_target {
                self.enter(CegisPhase::Verify);
            } else {
                warn!(
                    iteration,
                    trained = fit.final_loss,
                    rounded = rounded.total,
                    target,
                    "Rounded candidate misses the target loss; skipping verification"
                );
            }
            for obligation in &obligations {
                if !within_target || failure.is_some() {
                    reports.push(ObligationReport::skipped(obligation.name, obligation.region));
                    continue;
                }
                let query_started = Instant::now();
                let outcome = self.verifier.check(obligation, &symbols.names, deadline);
                let elapsed = query_started.elapsed().as_millis() as u64;
                reports.push(ObligationReport::new(
                    obligation.name,
                    obligation.region,
                    &outcome,
                    elapsed,
                ));
                match &outcome {
                    ObligationOutcome::Verified => {
                        info!(
                            iteration,
                            obligation = obligation.name,
                            elapsed_ms = elapsed,
                            "Obligation verified"
                        );
                    }
                    ObligationOutcome::Counterexample(cex) => {
                        info!(
                            iteration,
                            obligation = obligation.name,
                            point = ?cex.point,
                            "Counterexample found"
                        );
                    }
                    ObligationOutcome::Unknown { reason, detail } => {
                        warn!(
                            iteration,
                            obligation = obligation.name,
                            ?reason,
                            detail = detail.as_str(),
                            "Obligation undecided"
                        );
                    }
                }
                if !outcome.is_verified() {
                    failure = Some((obligation, outcome));
                }
            }

            let snapshot = Snapshot {
                candidate: candidate.clone(),
                symbols,
                loss: rounded.total,
            };
            let improved = best.as_ref().map_or(true, |b| snapshot.loss < b.loss);
            let mut samples_added = 0;

            if !within_target {
                if improved {
                    best = Some(snapshot);
                }
                self.enter(CegisPhase::Refine);
                let hits = Refiner::violations(&self.certificate.probes(), &rounded, &data);
                match self
                    .refiner
                    .reinforce(&hits, &self.config.data, &mut data, &mut rng)
                {
                    Ok(added) => samples_added = added,
                    Err(e @ CegisError::SamplingExhausted { .. }) => {
                        warn!(iteration, error = %e, "Refinement sampling exhausted");
                    }
                    Err(e) => return Err(e),
                }
            } else {
                match failure {
                    None => verified = Some(snapshot),
                    Some((obligation, outcome)) => {
                        if improved {
                            best = Some(snapshot);
                        }
                        self.enter(CegisPhase::Refine);
                        match self.refiner.refine(
                            &outcome,
                            obligation,
                            &self.config.data,
                            &mut data,
                            &mut rng,
                        ) {
                            Ok(added) => samples_added = added,
                            Err(e @ CegisError::SamplingExhausted { .. }) => {
                                warn!(iteration, error = %e, "Refinement sampling exhausted");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            let best_loss = match (&verified, &best) {
                (Some(v), Some(b)) => v.loss.min(b.loss),
                (Some(v), None) => v.loss,
                (None, Some(b)) => b.loss,
                (None, None) => rounded.total,
            };
            history.push(IterationReport {
                iteration,
                train_steps: fit.steps,
                train_loss: fit.final_loss,
                fit_converged: fit.converged,
                rounded_loss: rounded.total,
                verification_attempted: within_target,
                best_loss,
                obligations: reports,
                samples_added,
                dataset_size: data.total(),
                elapsed_ms: iteration_started.elapsed().as_millis() as u64,
            });

            if verified.is_some() {
                break "verified";
            }
        };

        let status = if verified.is_some() {
            CegisStatus::Verified
        } else {
            CegisStatus::Exhausted
        };
        let outcome = match verified.or(best) {
            Some(snapshot) => snapshot,
            None => {
                self.translator.project(&mut candidate)?;
                let loss = self
                    .learner
                    .evaluate(&candidate, &self.certificate, system.as_ref(), &data)?
                    .total;
                let symbols = self.translator.translate(&candidate, system.as_ref())?;
                Snapshot {
                    candidate,
                    symbols,
                    loss,
                }
            }
        };
        self.enter(match status {
            CegisStatus::Verified => CegisPhase::Verified,
            CegisStatus::Exhausted => CegisPhase::Exhausted,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            status = %status,
            iterations = iteration,
            loss = outcome.loss,
            elapsed_ms,
            "CEGIS finished"
        );

        Ok(CegisResult {
            status,
            certificate: self.config.certificate,
            iterations: iteration,
            elapsed_ms,
            final_loss: outcome.loss,
            expression: to_smtlib(&outcome.symbols.certificate),
            expression_alt: outcome.symbols.certificate_alt.as_ref().map(to_smtlib),
            controller: outcome
                .symbols
                .controller
                .as_ref()
                .map(|u| u.iter().map(to_smtlib).collect()),
            weights: outcome.candidate.weights(),
            termination: CegisTermination {
                reason: reason.to_string(),
                iteration_budget: self.config.cegis_max_iters,
                iterations_used: iteration,
                timeout_secs: self.config.timeout_secs,
                elapsed_ms,
                reached_iteration_budget: reason == "iteration budget exhausted",
                reached_timeout_budget: reason == "timeout",
            },
            history,
            symbols: outcome.symbols,
            candidate: outcome.candidate,
        })
    }
}

/// Whether a rounded candidate may go to the verifier. Rounding must not
/// push the loss above both the trained loss and the target; a fit that
/// plateaued above target is still verified as long as rounding kept it.
fn rounding_kept_the_fit(trained: f64, rounded: f64, target: f64) -> bool {
    rounded <= trained.max(target) + 1e-12
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActivationType, CertificateType, RegionKey};
    use crate::domains::Set;
    use crate::result::OutcomeKind;
    use crate::system::LinearSystem;

    fn stable_system() -> Arc<dyn System> {
        Arc::new(LinearSystem::new(vec![vec![-1.0, 0.0], vec![0.0, -2.0]]).expect("square"))
    }

    fn lyapunov_config() -> CegisConfig {
        let mut config = CegisConfig::new(2, CertificateType::Lyapunov)
            .with_network(vec![4], vec![ActivationType::Square])
            .with_domain(RegionKey::Lie, Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]))
            .with_data(
                RegionKey::Lie,
                Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]),
                200,
            );
        config.learner.max_steps = 300;
        config.rounding = Some(3);
        config.cegis_max_iters = 5;
        config
    }

    #[test]
    fn missing_domain_is_rejected_before_training() {
        let config = CegisConfig::new(2, CertificateType::Barrier);
        match Cegis::new(config, stable_system()) {
            Err(CegisError::ConfigurationInvalid(_)) => {}
            Err(other) => panic!("Expected configuration error, got: {other}"),
            Ok(_) => panic!("Expected configuration error"),
        }
    }

    #[test]
    fn zero_iteration_budget_is_exhausted_immediately() {
        let mut config = lyapunov_config();
        config.cegis_max_iters = 0;
        let mut cegis = Cegis::new(config, stable_system()).expect("valid");
        let result = cegis.solve().expect("runs");
        assert_eq!(result.status, CegisStatus::Exhausted);
        assert_eq!(result.iterations, 0);
        assert!(result.history.is_empty());
        assert!(result.termination.reached_iteration_budget);
        assert_eq!(cegis.phase(), CegisPhase::Exhausted);
    }

    #[test]
    fn history_tracks_every_iteration() {
        let mut cegis = Cegis::new(lyapunov_config(), stable_system()).expect("valid");
        let result = cegis.solve().expect("runs");
        assert_eq!(result.history.len(), result.iterations);
        assert!(result.iterations <= 5);
        for pair in result.history.windows(2) {
            assert!(pair[1].best_loss <= pair[0].best_loss);
        }
        if result.is_verified() {
            let last = result.history.last().expect("at least one iteration");
            assert!(last
                .obligations
                .iter()
                .all(|o| o.outcome == OutcomeKind::Verified));
        }
    }

    #[test]
    fn verified_weights_match_the_rounded_candidate() {
        let mut cegis = Cegis::new(lyapunov_config(), stable_system()).expect("valid");
        let result = cegis.solve().expect("runs");
        let flat = result.candidate.flatten();
        for w in flat {
            let scaled = w * 1000.0;
            assert!((scaled - scaled.round()).abs() < 1e-6, "weight {w} is not rounded");
        }
    }

    #[test]
    fn rounding_regression_blocks_verification() {
        assert!(rounding_kept_the_fit(0.0, 5e-4, 1e-3));
        assert!(rounding_kept_the_fit(0.2, 0.2, 1e-3));
        assert!(rounding_kept_the_fit(0.2, 0.1, 1e-3));
        assert!(!rounding_kept_the_fit(0.0, 2e-3, 1e-3));
        assert!(!rounding_kept_the_fit(0.2, 0.25, 1e-3));
    }

    #[test]
    fn only_gated_candidates_reach_the_verifier() {
        let mut config = lyapunov_config();
        config.rounding = Some(0);
        let target = config.learner.target_loss;
        let mut cegis = Cegis::new(config, stable_system()).expect("valid");
        let result = cegis.solve().expect("runs");
        assert!(!result.history.is_empty());
        for report in &result.history {
            let kept = report.rounded_loss <= report.train_loss.max(target) + 1e-12;
            assert_eq!(report.verification_attempted, kept, "{report:?}");
            if !kept {
                assert!(report
                    .obligations
                    .iter()
                    .all(|o| o.outcome == OutcomeKind::Skipped));
            }
        }
        if result.is_verified() {
            let last = result.history.last().expect("at least one iteration");
            assert!(last.verification_attempted);
        }
    }
}
