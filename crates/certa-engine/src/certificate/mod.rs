//! Certificate variants.
//!
//! Each variant fixes which regions it needs, a hinge loss over sampled
//! points and the exact obligations handed to the verifier. The loss is a
//! relaxation of the obligations: every obligation `domain ⇒ requirement`
//! has a hinge term on the matching region's samples.

pub mod barrier;
pub mod lyapunov;
pub mod rar;
pub mod rws;

use std::collections::BTreeMap;

use certa_smt::terms::SmtTerm;
use ndarray::Array1;

use crate::config::{CegisConfig, CertificateType, RegionKey};
use crate::domains::Set;
use crate::error::CegisError;
use crate::translator::CandidateSymbols;

pub use barrier::Barrier;
pub use lyapunov::Lyapunov;
pub use rar::Rar;
pub use rws::Rws;

/// Which network a probe evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRole {
    Primary,
    Alt,
}

/// A batch quantity a loss needs: the network output on a region's
/// samples and, if `flow` is set, its derivative (or difference) along
/// the dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub region: RegionKey,
    pub role: NetRole,
    pub flow: bool,
}

impl Probe {
    pub const fn value(region: RegionKey, role: NetRole) -> Self {
        Self {
            region,
            role,
            flow: false,
        }
    }

    pub const fn flow(region: RegionKey, role: NetRole) -> Self {
        Self {
            region,
            role,
            flow: true,
        }
    }
}

/// Probe results, one entry per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeValues {
    pub value: Array1<f64>,
    /// Zeros when the probe has no flow.
    pub flow: Array1<f64>,
    /// `|x|^2` of each sample.
    pub sq_norm: Array1<f64>,
}

/// Loss derivatives with respect to a probe's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeGrad {
    pub value: Array1<f64>,
    pub flow: Array1<f64>,
}

impl ProbeGrad {
    fn zeros(len: usize) -> Self {
        Self {
            value: Array1::zeros(len),
            flow: Array1::zeros(len),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossTerms {
    pub total: f64,
    pub terms: Vec<(&'static str, f64)>,
    pub grads: Vec<ProbeGrad>,
}

impl LossTerms {
    fn new(values: &[ProbeValues]) -> Self {
        Self {
            total: 0.0,
            terms: Vec::new(),
            grads: values.iter().map(|v| ProbeGrad::zeros(v.value.len())).collect(),
        }
    }

    fn push(&mut self, name: &'static str, value: f64) {
        self.total += value;
        self.terms.push((name, value));
    }
}

/// `domain ∧ ¬requirement` must be unsatisfiable.
#[derive(Debug, Clone, PartialEq)]
pub struct Obligation {
    pub name: &'static str,
    /// Data region that receives counterexamples.
    pub region: RegionKey,
    pub domain: SmtTerm,
    pub requirement: SmtTerm,
    /// Box enclosing `domain`, used to bound solver variables.
    pub bounds: (Vec<f64>, Vec<f64>),
}

impl Obligation {
    /// The formula whose satisfiability refutes the obligation.
    pub fn query(&self) -> SmtTerm {
        SmtTerm::and(vec![self.domain.clone(), self.requirement.clone().not()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Certificate {
    Lyapunov(Lyapunov),
    Barrier(Barrier),
    Rws(Rws),
    Rar(Rar),
}

impl Certificate {
    pub fn from_config(config: &CegisConfig) -> Self {
        match config.certificate {
            CertificateType::Lyapunov => Certificate::Lyapunov(Lyapunov::from_config(config)),
            CertificateType::Barrier => Certificate::Barrier(Barrier::from_config(config)),
            CertificateType::Rws => Certificate::Rws(Rws::from_config(config)),
            CertificateType::Rar => Certificate::Rar(Rar::from_config(config)),
        }
    }

    pub fn kind(&self) -> CertificateType {
        match self {
            Certificate::Lyapunov(_) => CertificateType::Lyapunov,
            Certificate::Barrier(_) => CertificateType::Barrier,
            Certificate::Rws(_) => CertificateType::Rws,
            Certificate::Rar(_) => CertificateType::Rar,
        }
    }

    /// Whether the primary network is shifted so that `V(0) = 0`.
    pub fn anchored(&self) -> bool {
        matches!(self, Certificate::Lyapunov(_))
    }

    pub fn probes(&self) -> Vec<Probe> {
        match self {
            Certificate::Lyapunov(_) => lyapunov::PROBES.to_vec(),
            Certificate::Barrier(_) => barrier::PROBES.to_vec(),
            Certificate::Rws(_) => rws::PROBES.to_vec(),
            Certificate::Rar(_) => rar::PROBES.to_vec(),
        }
    }

    /// Loss over probe results given in [`Certificate::probes`] order.
    pub fn loss(&self, values: &[ProbeValues]) -> Result<LossTerms, CegisError> {
        let expected = self.probes().len();
        if values.len() != expected {
            return Err(CegisError::Dimension(format!(
                "{} loss expects {expected} probes, got {}",
                self.kind(),
                values.len()
            )));
        }
        Ok(match self {
            Certificate::Lyapunov(c) => c.loss(values),
            Certificate::Barrier(c) => c.loss(values),
            Certificate::Rws(c) => c.loss(values),
            Certificate::Rar(c) => c.loss(values),
        })
    }

    /// Verification obligations in the order they are checked.
    pub fn obligations(
        &self,
        symbols: &CandidateSymbols,
        domains: &BTreeMap<RegionKey, Set>,
    ) -> Result<Vec<Obligation>, CegisError> {
        match self {
            Certificate::Lyapunov(c) => c.obligations(symbols, domains),
            Certificate::Barrier(c) => c.obligations(symbols, domains),
            Certificate::Rws(c) => c.obligations(symbols, domains),
            Certificate::Rar(c) => c.obligations(symbols, domains),
        }
    }
}

/// Symbolic regions a certificate type needs.
pub fn required_domains(kind: CertificateType) -> &'static [RegionKey] {
    match kind {
        CertificateType::Lyapunov => &[RegionKey::Lie],
        CertificateType::Barrier => &[RegionKey::Lie, RegionKey::Init, RegionKey::Unsafe],
        CertificateType::Rws => &[
            RegionKey::Lie,
            RegionKey::Init,
            RegionKey::Safe,
            RegionKey::SafeBorder,
            RegionKey::Goal,
        ],
        CertificateType::Rar => &[
            RegionKey::Lie,
            RegionKey::Init,
            RegionKey::Safe,
            RegionKey::SafeBorder,
            RegionKey::Goal,
            RegionKey::Final,
        ],
    }
}

/// Sample sets a certificate type trains on.
pub fn required_data(kind: CertificateType) -> &'static [RegionKey] {
    match kind {
        CertificateType::Lyapunov => &[RegionKey::Lie],
        CertificateType::Barrier | CertificateType::Rws => {
            &[RegionKey::Lie, RegionKey::Init, RegionKey::Unsafe]
        }
        CertificateType::Rar => &[
            RegionKey::Lie,
            RegionKey::Init,
            RegionKey::Unsafe,
            RegionKey::Goal,
            RegionKey::Final,
            RegionKey::NotFinal,
        ],
    }
}

/// Mean of `max(0, s_i)` over the masked entries, with its gradient in `s`.
pub(crate) fn hinge(slack: &Array1<f64>, mask: Option<&[bool]>) -> (f64, Array1<f64>) {
    let included = |i: usize| mask.map_or(true, |m| m[i]);
    let count = (0..slack.len()).filter(|&i| included(i)).count();
    let mut grad = Array1::zeros(slack.len());
    if count == 0 {
        return (0.0, grad);
    }
    let scale = 1.0 / count as f64;
    let mut total = 0.0;
    for (i, s) in slack.iter().enumerate() {
        if included(i) && *s > 0.0 {
            total += s;
            grad[i] = scale;
        }
    }
    (total * scale, grad)
}

/// Samples near the zero level set used for belt losses.
pub(crate) fn belt_mask(value: &Array1<f64>, symmetric: bool, width: f64) -> Vec<bool> {
    value
        .iter()
        .map(|v| if symmetric { v.abs() <= width } else { *v >= -width })
        .collect()
}

/// Symbolic belt around `v = 0` used by flow obligations.
pub(crate) fn belt_predicate(v: &SmtTerm, symmetric: bool, epsilon: f64) -> SmtTerm {
    if symmetric {
        SmtTerm::and(vec![
            v.clone().ge(SmtTerm::num(-epsilon)),
            v.clone().le(SmtTerm::num(epsilon)),
        ])
    } else {
        v.clone().eq(SmtTerm::zero())
    }
}

pub(crate) fn region<'a>(
    domains: &'a BTreeMap<RegionKey, Set>,
    key: RegionKey,
) -> Result<&'a Set, CegisError> {
    domains.get(&key).ok_or_else(|| {
        CegisError::ConfigurationInvalid(format!("missing `{key}` domain"))
    })
}

pub(crate) fn intersect_boxes(
    a: (Vec<f64>, Vec<f64>),
    b: (Vec<f64>, Vec<f64>),
) -> (Vec<f64>, Vec<f64>) {
    (
        a.0.iter().zip(&b.0).map(|(x, y)| x.max(*y)).collect(),
        a.1.iter().zip(&b.1).map(|(x, y)| x.min(*y)).collect(),
    )
}

pub(crate) fn alt_symbols(
    symbols: &CandidateSymbols,
) -> Result<(&SmtTerm, &SmtTerm), CegisError> {
    match (&symbols.certificate_alt, &symbols.flow_alt) {
        (Some(v), Some(flow)) => Ok((v, flow)),
        _ => Err(CegisError::ConfigurationInvalid(
            "certificate needs an alternate network but none was translated".into(),
        )),
    }
}
