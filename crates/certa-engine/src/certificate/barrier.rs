//! Barrier certificates.
//!
//! `V <= 0` on the initial set, `V > 0` on the unsafe set and `dV < 0` on
//! the belt around the zero level set, so trajectories cannot cross from
//! the sublevel set into the unsafe region.

use std::collections::BTreeMap;

use super::{
    belt_mask, belt_predicate, hinge, region, LossTerms, NetRole, Obligation, Probe, ProbeValues,
};
use crate::config::{CegisConfig, RegionKey};
use crate::domains::Set;
use crate::error::CegisError;
use crate::translator::CandidateSymbols;
use certa_smt::terms::SmtTerm;

pub(crate) const PROBES: [Probe; 3] = [
    Probe::value(RegionKey::Init, NetRole::Primary),
    Probe::value(RegionKey::Unsafe, NetRole::Primary),
    Probe::flow(RegionKey::Lie, NetRole::Primary),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Barrier {
    pub margin: f64,
    pub symmetric_belt: bool,
    /// Belt half-width on samples.
    pub belt_width: f64,
    /// Belt half-width in verification when the belt is symmetric.
    pub belt_epsilon: f64,
}

impl Barrier {
    pub fn from_config(config: &CegisConfig) -> Self {
        Self {
            margin: config.learner.margin,
            symmetric_belt: config.symmetric_belt,
            belt_width: config.learner.belt_width,
            belt_epsilon: config.belt_epsilon,
        }
    }

    pub fn loss(&self, values: &[ProbeValues]) -> LossTerms {
        let mut out = LossTerms::new(values);
        let (init, unsafe_, lie) = (&values[0], &values[1], &values[2]);

        let (l_init, g) = hinge(&(&init.value + self.margin), None);
        out.grads[0].value += &g;
        out.push("init", l_init);

        let (l_unsafe, g) = hinge(&(self.margin - &unsafe_.value), None);
        out.grads[1].value -= &g;
        out.push("unsafe", l_unsafe);

        let mask = belt_mask(&lie.value, self.symmetric_belt, self.belt_width);
        let (l_lie, g) = hinge(&(&lie.flow + self.margin), Some(&mask));
        out.grads[2].flow += &g;
        out.push("lie", l_lie);
        out
    }

    pub fn obligations(
        &self,
        symbols: &CandidateSymbols,
        domains: &BTreeMap<RegionKey, Set>,
    ) -> Result<Vec<Obligation>, CegisError> {
        let (init, unsafe_, lie) = (
            region(domains, RegionKey::Init)?,
            region(domains, RegionKey::Unsafe)?,
            region(domains, RegionKey::Lie)?,
        );
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
                name: "unsafe",
                region: RegionKey::Unsafe,
                domain: unsafe_.predicate(x),
                requirement: v.clone().gt(SmtTerm::zero()),
                bounds: unsafe_.bounding_box(),
            },
            Obligation {
                name: "lie",
                region: RegionKey::Lie,
                domain: SmtTerm::and(vec![
                    lie.predicate(x),
                    belt_predicate(v, self.symmetric_belt, self.belt_epsilon),
                ]),
                requirement: symbols.flow.clone().lt(SmtTerm::zero()),
                bounds: lie.bounding_box(),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{env, probe, vars};
    use super::*;

    fn cert(symmetric_belt: bool) -> Barrier {
        Barrier {
            margin: 0.1,
            symmetric_belt,
            belt_width: 0.5,
            belt_epsilon: 0.05,
        }
    }

    #[test]
    fn separated_values_give_zero_loss() {
        let values = [
            probe(&[-1.0, -0.5], &[0.0, 0.0], &[0.0, 0.0]),
            probe(&[1.0, 2.0], &[0.0, 0.0], &[0.0, 0.0]),
            probe(&[0.1, -3.0], &[-1.0, 5.0], &[0.0, 0.0]),
        ];
        // the growing sample at V = -3 sits outside the belt
        assert_eq!(cert(true).loss(&values).total, 0.0);
    }

    #[test]
    fn asymmetric_belt_covers_the_unsafe_side() {
        let values = [
            probe(&[], &[], &[]),
            probe(&[], &[], &[]),
            probe(&[3.0], &[1.0], &[0.0]),
        ];
        assert_eq!(cert(true).loss(&values).total, 0.0);
        let loss = cert(false).loss(&values);
        assert!((loss.total - 1.1).abs() < 1e-12);
        assert_eq!(loss.grads[2].flow.to_vec(), vec![1.0]);
    }

    #[test]
    fn init_and_unsafe_gradients_have_opposite_signs() {
        let values = [
            probe(&[0.5], &[0.0], &[0.0]),
            probe(&[-0.5], &[0.0], &[0.0]),
            probe(&[], &[], &[]),
        ];
        let loss = cert(false).loss(&values);
        assert_eq!(loss.grads[0].value.to_vec(), vec![1.0]);
        assert_eq!(loss.grads[1].value.to_vec(), vec![-1.0]);
        assert!((loss.total - 1.2).abs() < 1e-12);
    }

    #[test]
    fn lie_obligation_uses_the_zero_level_set() {
        let x = vars(1);
        let v = x[0].clone() - SmtTerm::one();
        let symbols = CandidateSymbols::for_tests(x.clone(), v, -x[0].clone());
        let mut domains = BTreeMap::new();
        domains.insert(RegionKey::Lie, Set::rectangle(vec![-3.0], vec![3.0]));
        domains.insert(RegionKey::Init, Set::rectangle(vec![-1.0], vec![0.0]));
        domains.insert(RegionKey::Unsafe, Set::rectangle(vec![2.0], vec![3.0]));

        let asymmetric = cert(false).obligations(&symbols, &domains).expect("domains");
        let lie = &asymmetric[2];
        assert!(lie.domain.eval_bool(&env(&[1.0])).expect("closed"));
        assert!(!lie.domain.eval_bool(&env(&[1.02])).expect("closed"));

        let symmetric = cert(true).obligations(&symbols, &domains).expect("domains");
        assert!(symmetric[2].domain.eval_bool(&env(&[1.02])).expect("closed"));
        assert_eq!(symmetric[1].bounds, (vec![2.0], vec![3.0]));
    }
}
