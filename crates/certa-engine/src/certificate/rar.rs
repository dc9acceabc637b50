//! Reach-avoid-remain certificates.
//!
//! The primary network carries the reach-while-stay conditions. A second
//! network `W` shows that the final set is never left once entered:
//! `W <= 0` on the goal, `W > 0` outside the final set and `dW < 0` on the
//! belt of `W` inside the final set.

use std::collections::BTreeMap;

use certa_smt::terms::SmtTerm;

use super::{
    alt_symbols, belt_mask, belt_predicate, hinge, region, LossTerms, NetRole, Obligation, Probe,
    ProbeValues, Rws,
};
use crate::config::{CegisConfig, RegionKey};
use crate::domains::Set;
use crate::error::CegisError;
use crate::translator::CandidateSymbols;

pub(crate) const PROBES: [Probe; 6] = [
    Probe::value(RegionKey::Init, NetRole::Primary),
    Probe::value(RegionKey::Unsafe, NetRole::Primary),
    Probe::flow(RegionKey::Lie, NetRole::Primary),
    Probe::value(RegionKey::Goal, NetRole::Alt),
    Probe::value(RegionKey::NotFinal, NetRole::Alt),
    Probe::flow(RegionKey::Final, NetRole::Alt),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Rar {
    pub rws: Rws,
    pub margin: f64,
    pub symmetric_belt: bool,
    pub belt_width: f64,
    pub belt_epsilon: f64,
}

impl Rar {
    pub fn from_config(config: &CegisConfig) -> Self {
        Self {
            rws: Rws::from_config(config),
            margin: config.learner.margin,
            symmetric_belt: config.symmetric_belt,
            belt_width: config.learner.belt_width,
            belt_epsilon: config.belt_epsilon,
        }
    }

    pub fn loss(&self, values: &[ProbeValues]) -> LossTerms {
        let mut out = LossTerms::new(values);
        self.rws.accumulate(values, &mut out);
        let (goal, not_final, final_) = (&values[3], &values[4], &values[5]);

        let (l_goal, g) = hinge(&(&goal.value + self.margin), None);
        out.grads[3].value += &g;
        out.push("goal", l_goal);

        let (l_outside, g) = hinge(&(self.margin - &not_final.value), None);
        out.grads[4].value -= &g;
        out.push("remain", l_outside);

        let mask = belt_mask(&final_.value, self.symmetric_belt, self.belt_width);
        let (l_final, g) = hinge(&(&final_.flow + self.margin), Some(&mask));
        out.grads[5].flow += &g;
        out.push("final_decrease", l_final);
        out
    }

    pub fn obligations(
        &self,
        symbols: &CandidateSymbols,
        domains: &BTreeMap<RegionKey, Set>,
    ) -> Result<Vec<Obligation>, CegisError> {
        let mut obligations = self.rws.obligations(symbols, domains)?;
        let (w, w_flow) = alt_symbols(symbols)?;
        let goal = region(domains, RegionKey::Goal)?;
        let final_ = region(domains, RegionKey::Final)?;
        let lie = region(domains, RegionKey::Lie)?;
        let x = &symbols.vars;
        obligations.extend([
            Obligation {
                name: "goal",
                region: RegionKey::Goal,
                domain: goal.predicate(x),
                requirement: w.clone().le(SmtTerm::zero()),
                bounds: goal.bounding_box(),
            },
            Obligation {
                name: "remain",
                region: RegionKey::NotFinal,
                domain: SmtTerm::and(vec![lie.predicate(x), final_.predicate(x).not()]),
                requirement: w.clone().gt(SmtTerm::zero()),
                bounds: lie.bounding_box(),
            },
            Obligation {
                name: "final_decrease",
                region: RegionKey::Final,
                domain: SmtTerm::and(vec![
                    final_.predicate(x),
                    belt_predicate(w, self.symmetric_belt, self.belt_epsilon),
                ]),
                requirement: w_flow.clone().lt(SmtTerm::zero()),
                bounds: final_.bounding_box(),
            },
        ]);
        Ok(obligations)
    }
}
