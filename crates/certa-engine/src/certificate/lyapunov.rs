//! Lyapunov certificates: `V > 0` and `dV < 0` away from the origin.

use std::collections::BTreeMap;

use certa_smt::terms::SmtTerm;

use super::{hinge, region, LossTerms, NetRole, Obligation, Probe, ProbeValues};
use crate::config::{CegisConfig, RegionKey};
use crate::domains::Set;
use crate::error::CegisError;
use crate::translator::CandidateSymbols;

pub(crate) const PROBES: [Probe; 1] = [Probe::flow(RegionKey::Lie, NetRole::Primary)];

#[derive(Debug, Clone, PartialEq)]
pub struct Lyapunov {
    /// Coefficient of `|x|^2` in both hinge terms.
    pub margin: f64,
    /// Ball around the origin left out of training and verification.
    pub exclusion_radius: f64,
}

impl Lyapunov {
    pub fn from_config(config: &CegisConfig) -> Self {
        Self {
            margin: config.learner.margin,
            exclusion_radius: config.origin_exclusion(),
        }
    }

    /// `relu(τ|x|² − V) + relu(dV + τ|x|²)` averaged over samples outside the excluded ball.
    pub fn loss(&self, values: &[ProbeValues]) -> LossTerms {
        let mut out = LossTerms::new(values);
        let p = &values[0];
        let r2 = self.exclusion_radius * self.exclusion_radius;
        let mask: Vec<bool> = p.sq_norm.iter().map(|s| *s >= r2).collect();
        let quad = &p.sq_norm * self.margin;

        let (positive, g_pos) = hinge(&(&quad - &p.value), Some(&mask));
        let (decrease, g_dec) = hinge(&(&p.flow + &quad), Some(&mask));
        out.grads[0].value -= &g_pos;
        out.grads[0].flow += &g_dec;
        out.push("positive", positive);
        out.push("decrease", decrease);
        out
    }

    pub fn obligations(
        &self,
        symbols: &CandidateSymbols,
        domains: &BTreeMap<RegionKey, Set>,
    ) -> Result<Vec<Obligation>, CegisError> {
        let lie = region(domains, RegionKey::Lie)?;
        let sq_norm = SmtTerm::sum(symbols.vars.iter().map(|x| x.clone().powi(2)));
        let domain = SmtTerm::and(vec![
            lie.predicate(&symbols.vars),
            sq_norm.gt(SmtTerm::num(self.exclusion_radius).powi(2)),
        ]);
        let bounds = lie.bounding_box();
        Ok(vec![
            Obligation {
                name: "positive",
                region: RegionKey::Lie,
                domain: domain.clone(),
                requirement: symbols.certificate.clone().gt(SmtTerm::zero()),
                bounds: bounds.clone(),
            },
            Obligation {
                name: "decrease",
                region: RegionKey::Lie,
                domain,
                requirement: symbols.flow.clone().lt(SmtTerm::zero()),
                bounds,
            },
        ])
    }
}
