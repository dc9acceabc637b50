//! Reach-while-stay certificates.
//!
//! With `V <= 0` on the initial set, `V > 0` on the border of the safe set
//! and `dV < 0` wherever `V <= 0` inside the safe set but outside the goal,
//! the sublevel set `{V <= 0}` is trapped inside the safe set and drained
//! into the goal.

use std::collections::BTreeMap;

use certa_smt::terms::SmtTerm;

use super::{hinge, intersect_boxes, region, LossTerms, NetRole, Obligation, Probe, ProbeValues};
use crate::config::{CegisConfig, RegionKey};
use crate::domains::Set;
use crate::error::CegisError;
use crate::translator::CandidateSymbols;

pub(crate) const PROBES: [Probe; 3] = [
    Probe::value(RegionKey::Init, NetRole::Primary),
    Probe::value(RegionKey::Unsafe, NetRole::Primary),
    Probe::flow(RegionKey::Lie, NetRole::Primary),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Rws {
    pub margin: f64,
    /// Flow samples are kept while `V <= belt_width`.
    pub belt_width: f64,
}

impl Rws {
    pub fn from_config(config: &CegisConfig) -> Self {
        Self {
            margin: config.learner.margin,
            belt_width: config.learner.belt_width,
        }
    }

    pub fn loss(&self, values: &[ProbeValues]) -> LossTerms {
        let mut out = LossTerms::new(values);
        self.accumulate(values, &mut out);
        out
    }

    /// Adds the reach-while-stay terms for probes `0..3` of `values`.
    pub(crate) fn accumulate(&self, values: &[ProbeValues], out: &mut LossTerms) {
        let (init, unsafe_, lie) = (&values[0], &values[1], &values[2]);

        let (l_init, g) = hinge(&(&init.value + self.margin), None);
        out.grads[0].value += &g;
        out.push("init", l_init);

        let (l_unsafe, g) = hinge(&(self.margin - &unsafe_.value), None);
        out.grads[1].value -= &g;
        out.push("unsafe", l_unsafe);

        let mask: Vec<bool> = lie.value.iter().map(|v| *v <= self.belt_width).collect();
        let (l_lie, g) = hinge(&(&lie.flow + self.margin), Some(&mask));
        out.grads[2].flow += &g;
        out.push("decrease", l_lie);
    }

    pub fn obligations(
        &self,
        symbols: &CandidateSymbols,
        domains: &BTreeMap<RegionKey, Set>,
    ) -> Result<Vec<Obligation>, CegisError> {
        let init = region(domains, RegionKey::Init)?;
        let safe = region(domains, RegionKey::Safe)?;
        let border = region(domains, RegionKey::SafeBorder)?;
        let goal = region(domains, RegionKey::Goal)?;
        let lie = region(domains, RegionKey::Lie)?;
        let x = &symbols.vars;
        let v = &symbols.certificate;
        Ok(vec![
            Obligation {
                name: "init",
                region: RegionKey::Init,
                domain: init.predicate(x),
                requirement: v.clone().le(SmtTerm::zero()),
                bounds: init.bounding_box(),
            },
            Obligation {
                name: "stay",
                region: RegionKey::Unsafe,
                domain: border.border_predicate(x)?,
                requirement: v.clone().gt(SmtTerm::zero()),
                bounds: border.bounding_box(),
            },
            Obligation {
                name: "decrease",
                region: RegionKey::Lie,
                domain: SmtTerm::and(vec![
                    lie.predicate(x),
                    safe.predicate(x),
                    goal.predicate(x).not(),
                    v.clone().le(SmtTerm::zero()),
                ]),
                requirement: symbols.flow.clone().lt(SmtTerm::zero()),
                bounds: intersect_boxes(lie.bounding_box(), safe.bounding_box()),
            },
        ])
    }
}
