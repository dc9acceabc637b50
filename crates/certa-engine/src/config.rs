//! Run configuration.
//!
//! A [`CegisConfig`] is assembled by the caller, validated once by
//! [`crate::cegis::Cegis::new`] and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domains::Set;
use crate::error::CegisError;
pub use crate::network::ActivationType;
use crate::system::System;

/// Canonical region names shared by every certificate variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKey {
    /// Region where the flow condition is imposed (the "decrease" region).
    Lie,
    Init,
    Unsafe,
    Safe,
    /// Set whose boundary carries the RWS "stay" condition.
    SafeBorder,
    Goal,
    Final,
    NotFinal,
}

impl RegionKey {
    pub const ALL: [RegionKey; 8] = [
        RegionKey::Lie,
        RegionKey::Init,
        RegionKey::Unsafe,
        RegionKey::Safe,
        RegionKey::SafeBorder,
        RegionKey::Goal,
        RegionKey::Final,
        RegionKey::NotFinal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RegionKey::Lie => "lie",
            RegionKey::Init => "init",
            RegionKey::Unsafe => "unsafe",
            RegionKey::Safe => "safe",
            RegionKey::SafeBorder => "safe_border",
            RegionKey::Goal => "goal",
            RegionKey::Final => "final",
            RegionKey::NotFinal => "not_final",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    #[default]
    Lyapunov,
    Barrier,
    Rws,
    Rar,
}

impl CertificateType {
    pub fn name(self) -> &'static str {
        match self {
            CertificateType::Lyapunov => "lyapunov",
            CertificateType::Barrier => "barrier",
            CertificateType::Rws => "rws",
            CertificateType::Rar => "rar",
        }
    }

    /// Whether the variant needs the alternate "remain" network.
    pub fn uses_alt_network(self) -> bool {
        self == CertificateType::Rar
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomain {
    #[default]
    Continuous,
    Discrete,
}

/// Decision procedure used for verification queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierType {
    /// Built-in interval branch-and-prune.
    #[default]
    Interval,
    Z3,
    Dreal,
}

impl VerifierType {
    pub fn name(self) -> &'static str {
        match self {
            VerifierType::Interval => "interval",
            VerifierType::Z3 => "z3",
            VerifierType::Dreal => "dreal",
        }
    }

    /// Whether the backend can reason about `exp`, `tanh` and friends.
    pub fn supports_transcendental(self) -> bool {
        !matches!(self, VerifierType::Z3)
    }

    /// Whether every variable must carry a finite bound.
    pub fn needs_bounded_domains(self) -> bool {
        matches!(self, VerifierType::Interval | VerifierType::Dreal)
    }
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample set assignment for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSpec {
    pub set: Set,
    pub count: usize,
}

impl DataSpec {
    pub fn new(set: Set, count: usize) -> Self {
        Self { set, count }
    }
}

/// Gradient descent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    pub learning_rate: f64,
    /// Upper bound on optimizer steps per CEGIS iteration.
    pub max_steps: usize,
    /// Training stops once the loss is at or below this value.
    pub target_loss: f64,
    /// Steps without improvement before training gives up early.
    pub patience: usize,
    /// Hinge margin applied to strict inequalities.
    pub margin: f64,
    /// Half-width of the sample belt around a zero level set.
    pub belt_width: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_steps: 1000,
            target_loss: 1e-3,
            patience: 250,
            margin: 0.01,
            belt_width: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CegisConfig {
    pub n_vars: usize,
    pub certificate: CertificateType,
    pub time_domain: TimeDomain,
    pub verifier: VerifierType,
    /// Hidden widths of the certificate network.
    pub n_hidden_neurons: Vec<usize>,
    /// One activation per hidden layer.
    pub activations: Vec<ActivationType>,
    pub n_hidden_neurons_alt: Vec<usize>,
    pub activations_alt: Vec<ActivationType>,
    /// Controller hidden widths followed by the control dimension.
    /// Empty when no controller is synthesized.
    pub ctrl_layers: Vec<usize>,
    /// One activation per controller hidden layer.
    pub ctrl_activations: Vec<ActivationType>,
    /// Symbolic regions used by verification obligations.
    pub domains: BTreeMap<RegionKey, Set>,
    /// Regions sampled for training.
    pub data: BTreeMap<RegionKey, DataSpec>,
    pub cegis_max_iters: usize,
    pub learner: LearnerConfig,
    /// Per-query verifier budget in seconds, 0 for none.
    pub verifier_timeout_secs: u64,
    /// Overall run budget in seconds, 0 for none.
    pub timeout_secs: u64,
    /// Solver δ: smallest box width for the interval backend, precision for dReal.
    pub precision: f64,
    /// Decimal digits kept when rounding weights. `None` keeps the shortest
    /// decimal that round-trips each `f64`.
    pub rounding: Option<u32>,
    pub symmetric_belt: bool,
    /// Half-width of the symmetric belt in verification.
    pub belt_epsilon: f64,
    /// Local certificate: exclude a ball of radius `llo_radius` around the origin.
    pub llo: bool,
    pub llo_radius: f64,
    /// Radius excluded around the origin for global Lyapunov certificates.
    pub origin_tolerance: f64,
    pub dedup_epsilon: f64,
    /// Jittered neighbours added around each counterexample.
    pub cex_cloud: usize,
    pub cex_spread: f64,
    /// Fresh points per region when an obligation comes back unknown.
    pub unknown_resample: usize,
    pub seed: u64,
}

impl Default for CegisConfig {
    fn default() -> Self {
        Self {
            n_vars: 0,
            certificate: CertificateType::default(),
            time_domain: TimeDomain::default(),
            verifier: VerifierType::default(),
            n_hidden_neurons: vec![5],
            activations: vec![ActivationType::Square],
            n_hidden_neurons_alt: Vec::new(),
            activations_alt: Vec::new(),
            ctrl_layers: Vec::new(),
            ctrl_activations: Vec::new(),
            domains: BTreeMap::new(),
            data: BTreeMap::new(),
            cegis_max_iters: 10,
            learner: LearnerConfig::default(),
            verifier_timeout_secs: 30,
            timeout_secs: 0,
            precision: 1e-3,
            rounding: None,
            symmetric_belt: false,
            belt_epsilon: 0.05,
            llo: false,
            llo_radius: 0.1,
            origin_tolerance: 1e-2,
            dedup_epsilon: 1e-6,
            cex_cloud: 10,
            cex_spread: 0.05,
            unknown_resample: 20,
            seed: 0,
        }
    }
}

impl CegisConfig {
    pub fn new(n_vars: usize, certificate: CertificateType) -> Self {
        Self {
            n_vars,
            certificate,
            ..Self::default()
        }
    }

    pub fn with_domain(mut self, key: RegionKey, set: Set) -> Self {
        self.domains.insert(key, set);
        self
    }

    pub fn with_data(mut self, key: RegionKey, set: Set, count: usize) -> Self {
        self.data.insert(key, DataSpec::new(set, count));
        self
    }

    pub fn with_network(mut self, widths: Vec<usize>, activations: Vec<ActivationType>) -> Self {
        self.n_hidden_neurons = widths;
        self.activations = activations;
        self
    }

    pub fn with_alt_network(
        mut self,
        widths: Vec<usize>,
        activations: Vec<ActivationType>,
    ) -> Self {
        self.n_hidden_neurons_alt = widths;
        self.activations_alt = activations;
        self
    }

    pub fn with_controller(mut self, layers: Vec<usize>, activations: Vec<ActivationType>) -> Self {
        self.ctrl_layers = layers;
        self.ctrl_activations = activations;
        self
    }

    pub fn has_controller(&self) -> bool {
        !self.ctrl_layers.is_empty()
    }

    /// Radius of the ball around the origin excluded from Lyapunov checks.
    pub fn origin_exclusion(&self) -> f64 {
        if self.llo {
            self.llo_radius
        } else {
            self.origin_tolerance
        }
    }

    /// Check the configuration against the chosen certificate and system.
    pub fn validate(&self, system: &dyn System) -> Result<(), CegisError> {
        let invalid = |msg: String| Err(CegisError::ConfigurationInvalid(msg));

        if self.n_vars == 0 {
            return invalid("n_vars must be positive".into());
        }
        if system.state_dim() != self.n_vars {
            return invalid(format!(
                "system `{}` has {} states but n_vars is {}",
                system.name(),
                system.state_dim(),
                self.n_vars
            ));
        }
        check_architecture("certificate", &self.n_hidden_neurons, &self.activations)?;
        if self.certificate.uses_alt_network() {
            check_architecture("alt", &self.n_hidden_neurons_alt, &self.activations_alt)?;
        }

        let control_dim = system.control_dim();
        match (control_dim, self.ctrl_layers.last()) {
            (0, None) => {}
            (0, Some(_)) => {
                return invalid(format!(
                    "controller layers given but system `{}` takes no control input",
                    system.name()
                ))
            }
            (m, None) => {
                return invalid(format!(
                    "system `{}` takes {m} control inputs but no controller is configured",
                    system.name()
                ))
            }
            (m, Some(&out)) => {
                if out != m {
                    return invalid(format!(
                        "controller output width {out} does not match control dimension {m}"
                    ));
                }
                if self.ctrl_activations.len() + 1 != self.ctrl_layers.len() {
                    return invalid(format!(
                        "controller has {} hidden layers but {} activations",
                        self.ctrl_layers.len() - 1,
                        self.ctrl_activations.len()
                    ));
                }
                if self.ctrl_layers.contains(&0) {
                    return invalid("controller layer widths must be positive".into());
                }
            }
        }

        for key in crate::certificate::required_domains(self.certificate) {
            let Some(set) = self.domains.get(&key) else {
                return invalid(format!(
                    "{} certificate requires a `{key}` domain",
                    self.certificate
                ));
            };
            let dim = set.check()?;
            if dim != self.n_vars {
                return invalid(format!("`{key}` domain has dimension {dim}, expected {}", self.n_vars));
            }
            if self.verifier.needs_bounded_domains() {
                let (lo, hi) = set.bounding_box();
                if lo.iter().chain(&hi).any(|b| !b.is_finite()) {
                    return invalid(format!(
                        "`{key}` domain is unbounded; the {} verifier needs finite bounds",
                        self.verifier
                    ));
                }
            }
        }
        for key in crate::certificate::required_data(self.certificate) {
            let Some(spec) = self.data.get(&key) else {
                return invalid(format!("{} certificate requires `{key}` data", self.certificate));
            };
            if spec.count == 0 {
                return invalid(format!("`{key}` data must request at least one sample"));
            }
            let dim = spec.set.check()?;
            if dim != self.n_vars {
                return invalid(format!("`{key}` data has dimension {dim}, expected {}", self.n_vars));
            }
        }
        if self.certificate == CertificateType::Rws || self.certificate == CertificateType::Rar {
            if let Some(border) = self.domains.get(&RegionKey::SafeBorder) {
                if !border.has_border() {
                    return invalid(
                        "`safe_border` must be a rectangle or a sphere to carry a border".into(),
                    );
                }
            }
        }

        if self.verifier == VerifierType::Z3 {
            if !cfg!(feature = "z3") {
                return invalid("the z3 verifier needs certa-engine built with the `z3` feature".into());
            }
            let transcendental = self
                .activations
                .iter()
                .chain(&self.activations_alt)
                .chain(&self.ctrl_activations)
                .any(|a| !a.is_polynomial());
            if transcendental {
                return invalid("z3 only decides polynomial arithmetic; use polynomial activations".into());
            }
        }
        if self.certificate == CertificateType::Lyapunov
            && self.verifier == VerifierType::Interval
            && self.origin_exclusion() <= 0.0
        {
            return invalid(
                "interval verification of a Lyapunov certificate needs a positive origin exclusion radius"
                    .into(),
            );
        }

        if !(self.learner.learning_rate > 0.0) || self.learner.max_steps == 0 {
            return invalid("learner needs a positive learning rate and step budget".into());
        }
        if self.learner.margin < 0.0 || self.learner.belt_width < 0.0 || self.belt_epsilon < 0.0 {
            return invalid("margins and belt widths must be non-negative".into());
        }
        if !(self.precision > 0.0) {
            return invalid("precision must be positive".into());
        }
        if matches!(self.rounding, Some(d) if d > 15) {
            return invalid("rounding beyond 15 decimal digits exceeds f64 precision".into());
        }
        if self.dedup_epsilon < 0.0 || self.cex_spread < 0.0 {
            return invalid("dedup epsilon and counterexample spread must be non-negative".into());
        }
        Ok(())
    }
}

fn check_architecture(
    which: &str,
    widths: &[usize],
    activations: &[ActivationType],
) -> Result<(), CegisError> {
    if widths.is_empty() {
        return Err(CegisError::ConfigurationInvalid(format!(
            "{which} network needs at least one hidden layer"
        )));
    }
    if widths.len() != activations.len() {
        return Err(CegisError::ConfigurationInvalid(format!(
            "{which} network has {} hidden layers but {} activations",
            widths.len(),
            activations.len()
        )));
    }
    if widths.contains(&0) {
        return Err(CegisError::ConfigurationInvalid(format!(
            "{which} network layer widths must be positive"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::LinearSystem;

    fn stable_2d() -> LinearSystem {
        LinearSystem::new(vec![vec![-1.0, 0.0], vec![0.0, -2.0]]).expect("square matrix")
    }

    fn lyapunov_config() -> CegisConfig {
        let domain = Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]);
        CegisConfig::new(2, CertificateType::Lyapunov)
            .with_domain(RegionKey::Lie, domain.clone())
            .with_data(RegionKey::Lie, domain, 100)
    }

    #[test]
    fn region_names_round_trip() {
        for key in RegionKey::ALL {
            assert_eq!(RegionKey::parse(key.name()), Some(key));
        }
        assert_eq!(RegionKey::parse("decrease"), None);
    }

    #[test]
    fn valid_lyapunov_config_passes() {
        lyapunov_config()
            .validate(&stable_2d())
            .expect("config should validate");
    }

    #[test]
    fn missing_domain_is_reported() {
        let mut config = lyapunov_config();
        config.domains.clear();
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(err.to_string().contains("`lie` domain"), "got: {err}");
    }

    #[test]
    fn barrier_needs_init_and_unsafe() {
        let mut config = lyapunov_config();
        config.certificate = CertificateType::Barrier;
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(matches!(err, CegisError::ConfigurationInvalid(_)));
    }

    #[test]
    fn state_dimension_mismatch_is_reported() {
        let mut config = lyapunov_config();
        config.n_vars = 3;
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(err.to_string().contains("n_vars is 3"), "got: {err}");
    }

    #[test]
    fn activation_count_must_match_layers() {
        let config = lyapunov_config().with_network(vec![5, 5], vec![ActivationType::Square]);
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(err.to_string().contains("2 hidden layers but 1 activations"), "got: {err}");
    }

    #[test]
    fn unbounded_domain_rejected_for_interval_verifier() {
        let config = lyapunov_config().with_domain(RegionKey::Lie, Set::unbounded(2));
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(err.to_string().contains("unbounded"), "got: {err}");
    }

    #[test]
    fn controller_on_autonomous_system_rejected() {
        let config = lyapunov_config().with_controller(vec![2], Vec::new());
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(err.to_string().contains("no control input"), "got: {err}");
    }

    #[test]
    fn z3_rejects_transcendental_activations() {
        let mut config = lyapunov_config().with_network(vec![4], vec![ActivationType::Tanh]);
        config.verifier = VerifierType::Z3;
        let err = config.validate(&stable_2d()).expect_err("must fail");
        assert!(matches!(err, CegisError::ConfigurationInvalid(_)));
    }

    #[test]
    fn zero_origin_exclusion_rejected_for_interval_lyapunov() {
        let mut config = lyapunov_config();
        config.origin_tolerance = 0.0;
        assert!(config.validate(&stable_2d()).is_err());
        config.llo = true;
        config.llo_radius = 0.2;
        config.validate(&stable_2d()).expect("llo radius covers the origin");
    }
}
