mod common;

use std::sync::Arc;

use certa_engine::cegis::{Cegis, CegisPhase};
use certa_engine::config::RegionKey;
use certa_engine::domains::Set;
use certa_engine::error::CegisError;
use certa_engine::result::{CegisStatus, OutcomeKind};
use common::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn lyapunov_for_stable_linear_system_verifies() {
    let system = linear(vec![vec![-1.0, 1.0], vec![-1.0, -1.0]]);
    let mut cegis = Cegis::new(lyapunov_2d(), system).expect("valid config");
    let result = cegis.solve().expect("run completes");

    assert_eq!(
        result.status,
        CegisStatus::Verified,
        "history: {:?}",
        result.history
    );
    assert!(result.iterations <= 10);
    assert_eq!(cegis.phase(), CegisPhase::Verified);

    let net = &result.candidate.certificate;
    let v0 = net.forward_point(&[0.0, 0.0])[0];
    assert!(v0.abs() < 1e-3, "V(0) = {v0}");
    let samples = square_domain(2, 1.0)
        .sample(200, &mut StdRng::seed_from_u64(5))
        .expect("box sampling");
    for row in samples.rows() {
        let x = row.to_vec();
        if x.iter().map(|v| v * v).sum::<f64>() < 1e-4 {
            continue;
        }
        let v = net.forward_point(&x)[0] - v0;
        assert!(v > 0.0, "V({x:?}) = {v}");
    }
}

#[test]
fn verified_run_reports_every_obligation_verified() {
    let system = linear(vec![vec![-1.0, 0.0], vec![0.0, -2.0]]);
    let mut cegis = Cegis::new(lyapunov_2d(), system).expect("valid config");
    let result = cegis.solve().expect("run completes");
    assert_eq!(
        result.status,
        CegisStatus::Verified,
        "history: {:?}",
        result.history
    );
    let last = result.history.last().expect("one iteration at least");
    let names: Vec<_> = last.obligations.iter().map(|o| o.name).collect();
    assert_eq!(names, ["positive", "decrease"]);
    assert!(last
        .obligations
        .iter()
        .all(|o| o.outcome == OutcomeKind::Verified));
    assert_eq!(result.termination.reason, "verified");
}

#[test]
fn barrier_run_is_verified_or_reports_its_loss() {
    let system = linear(vec![vec![-1.0, 0.0], vec![0.0, -1.0]]);
    let config = barrier_2d();
    let target = config.learner.target_loss;
    let mut cegis = Cegis::new(config, system).expect("valid config");
    let result = cegis.solve().expect("run completes");
    match result.status {
        CegisStatus::Verified => {
            let last = result.history.last().expect("one iteration at least");
            assert!(last.verification_attempted);
            assert!(last.rounded_loss <= target.max(last.train_loss) + 1e-12);
            if last.fit_converged {
                assert!(last.rounded_loss <= target + 1e-12, "{last:?}");
            }
            assert_eq!(last.obligations.len(), 3);
        }
        CegisStatus::Exhausted => {
            assert_eq!(result.iterations, 10);
            assert!(result.termination.reached_iteration_budget);
            assert!(result.final_loss.is_finite());
        }
    }
    // two-decimal rounding is reflected in the reported weights
    for layer in &result.weights.certificate {
        for w in layer.weight.iter().flatten() {
            assert!(((w * 100.0) - (w * 100.0).round()).abs() < 1e-6);
        }
    }
}

#[test]
fn rws_with_controller_keeps_a_consistent_history() {
    let config = rws_controlled();
    let initial: usize = config.data.values().map(|spec| spec.count).sum();
    let mut cegis = Cegis::new(config, Arc::new(SingleIntegrator)).expect("valid config");
    let result = cegis.solve().expect("run completes");
    let controller = result.controller.as_ref().expect("controller is reported");
    assert_eq!(controller.len(), 2);
    let ctrl = result.candidate.controller.as_ref().expect("controller net");
    assert_eq!(ctrl.forward_point(&[0.0, 0.0]), vec![0.0, 0.0]);

    assert_eq!(result.history.len(), result.iterations);
    let mut size = initial;
    let mut lowest = f64::INFINITY;
    for report in &result.history {
        size += report.samples_added;
        assert_eq!(report.dataset_size, size, "iteration {}", report.iteration);
        lowest = lowest.min(report.rounded_loss);
        assert_eq!(report.best_loss, lowest, "iteration {}", report.iteration);
        // obligations short-circuit: verified ones, then at most one failure, then skips
        let outcomes: Vec<_> = report.obligations.iter().map(|o| o.outcome).collect();
        let checked = outcomes
            .iter()
            .take_while(|o| **o == OutcomeKind::Verified)
            .count();
        let rest = &outcomes[checked..];
        if let Some((first, skipped)) = rest.split_first() {
            if report.verification_attempted {
                assert_ne!(*first, OutcomeKind::Skipped);
            }
            assert!(skipped.iter().all(|o| *o == OutcomeKind::Skipped));
        }
    }
    match result.status {
        CegisStatus::Verified => {
            let last = result.history.last().expect("one iteration at least");
            assert_eq!(result.final_loss, last.rounded_loss);
        }
        CegisStatus::Exhausted => assert_eq!(result.iterations, 5),
    }
}

#[test]
fn loop_always_halts_within_the_iteration_budget() {
    let system = linear(vec![vec![0.5, 0.0], vec![0.0, 0.5]]);
    for max_iters in 0..3 {
        let mut config = lyapunov_2d();
        config.cegis_max_iters = max_iters;
        config.learner.max_steps = 50;
        config.verifier_timeout_secs = 5;
        let mut cegis = Cegis::new(config, Arc::clone(&system)).expect("valid config");
        let result = cegis.solve().expect("run completes");
        // an unstable system has no Lyapunov function
        assert_eq!(result.status, CegisStatus::Exhausted);
        assert_eq!(result.iterations, max_iters);
        assert_eq!(result.history.len(), max_iters);
    }
}

#[test]
fn missing_region_is_a_configuration_error() {
    let mut config = barrier_2d();
    config.domains.remove(&RegionKey::Unsafe);
    let system = linear(vec![vec![-1.0, 0.0], vec![0.0, -1.0]]);
    match Cegis::new(config, system) {
        Err(CegisError::ConfigurationInvalid(msg)) => assert!(msg.contains("unsafe"), "{msg}"),
        Err(other) => panic!("Expected configuration error, got: {other}"),
        Ok(_) => panic!("Expected configuration error"),
    }
}

#[test]
fn unsatisfiable_sampler_fails_at_init() {
    let mut config = lyapunov_2d();
    let empty = Set::set_minus(square_domain(2, 1.0), square_domain(2, 2.0));
    config.data.get_mut(&RegionKey::Lie).expect("lie data").set = empty;
    let system = linear(vec![vec![-1.0, 0.0], vec![0.0, -1.0]]);
    let mut cegis = Cegis::new(config, system).expect("valid config");
    match cegis.solve() {
        Err(CegisError::SamplingExhausted { requested, .. }) => assert_eq!(requested, 500),
        Err(other) => panic!("Expected sampling exhaustion, got: {other}"),
        Ok(result) => panic!("Expected sampling exhaustion, got status {}", result.status),
    }
}

#[test]
fn result_serializes_to_json() {
    let system = linear(vec![vec![-1.0, 0.0], vec![0.0, -1.0]]);
    let mut config = lyapunov_2d();
    config.cegis_max_iters = 1;
    let mut cegis = Cegis::new(config, system).expect("valid config");
    let result = cegis.solve().expect("run completes");
    let json = serde_json::to_value(&result).expect("serializable");
    assert_eq!(json["certificate"], "lyapunov");
    assert!(json["expression"].is_string());
    assert!(json["history"].is_array());
    assert!(json.get("symbols").is_none());
}
