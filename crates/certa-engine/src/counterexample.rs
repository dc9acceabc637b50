//! Turns verifier outcomes into new training data.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::certificate::{LossTerms, Obligation, Probe};
use crate::config::{CegisConfig, DataSpec, RegionKey};
use crate::data::Dataset;
use crate::domains::Set;
use crate::error::CegisError;
use crate::verifier::{CounterExample, ObligationOutcome};

/// Refinement settings taken from the run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Refiner {
    /// Jittered neighbours generated around each counterexample.
    pub cloud: usize,
    /// Standard deviation of the jitter.
    pub spread: f64,
    /// Fresh samples drawn when an obligation comes back unknown.
    pub resample: usize,
    pub epsilon: f64,
}

impl Refiner {
    pub fn from_config(config: &CegisConfig) -> Self {
        Self {
            cloud: config.cex_cloud,
            spread: config.cex_spread,
            resample: config.unknown_resample,
            epsilon: config.dedup_epsilon,
        }
    }

    /// The counterexample followed by up to `cloud` neighbours that stay
    /// inside `set`.
    pub fn neighbourhood<R: Rng + ?Sized>(
        &self,
        cex: &CounterExample,
        set: Option<&Set>,
        rng: &mut R,
    ) -> Vec<Vec<f64>> {
        let mut points = vec![cex.point.clone()];
        points.extend(self.jitter(&cex.point, set, rng));
        points
    }

    fn jitter<R: Rng + ?Sized>(
        &self,
        point: &[f64],
        set: Option<&Set>,
        rng: &mut R,
    ) -> Vec<Vec<f64>> {
        if self.spread <= 0.0 {
            return Vec::new();
        }
        (0..self.cloud)
            .map(|_| {
                point
                    .iter()
                    .map(|x| x + self.spread * rng.sample::<f64, _>(StandardNormal))
                    .collect::<Vec<f64>>()
            })
            .filter(|p| set.map_or(true, |s| s.contains(p)))
            .collect()
    }

    /// Training points the rounded candidate still violates, per region.
    ///
    /// A point counts when any loss derivative at it is non-zero; every
    /// term is a hinge, so that is exactly where the candidate misses
    /// its margin.
    pub fn violations(
        probes: &[Probe],
        loss: &LossTerms,
        data: &Dataset,
    ) -> BTreeMap<RegionKey, Vec<Vec<f64>>> {
        let mut out: BTreeMap<RegionKey, Vec<Vec<f64>>> = BTreeMap::new();
        for (probe, grad) in probes.iter().zip(&loss.grads) {
            let points = data.points(probe.region);
            let hits = out.entry(probe.region).or_default();
            for (i, row) in points.rows().into_iter().enumerate() {
                let active = grad.value.get(i).is_some_and(|g| *g != 0.0)
                    || grad.flow.get(i).is_some_and(|g| *g != 0.0);
                let point = row.to_vec();
                if active && !hits.contains(&point) {
                    hits.push(point);
                }
            }
        }
        out.retain(|_, hits| !hits.is_empty());
        out
    }

    /// Adds neighbours around violated training points when the rounded
    /// candidate is not worth verifying. At most `cloud` points per region
    /// are used as centres. Returns the number of points added.
    pub fn reinforce<R: Rng + ?Sized>(
        &self,
        violations: &BTreeMap<RegionKey, Vec<Vec<f64>>>,
        specs: &BTreeMap<RegionKey, DataSpec>,
        data: &mut Dataset,
        rng: &mut R,
    ) -> Result<usize, CegisError> {
        let mut added = 0;
        for (region, hits) in violations {
            let set = specs.get(region).map(|s| &s.set);
            let take = self.cloud.max(1).min(hits.len());
            let centres = rand::seq::index::sample(rng, hits.len(), take);
            let mut points = Vec::new();
            for i in centres.iter() {
                points.extend(self.jitter(&hits[i], set, rng));
            }
            let n = data.add_points(*region, &points, self.epsilon)?;
            debug!(region = %region, centres = take, added = n, "reinforced data");
            added += n;
        }
        Ok(added)
    }

    /// Merges what `outcome` teaches into `data`. Returns the number of
    /// points added.
    ///
    /// Counterexamples go to the obligation's region together with their
    /// neighbourhood. Unknown outcomes resample that region's data set so
    /// the next round trains on fresh points. A sampler that cannot produce
    /// points surfaces as [`CegisError::SamplingExhausted`].
    pub fn refine<R: Rng + ?Sized>(
        &self,
        outcome: &ObligationOutcome,
        obligation: &Obligation,
        specs: &BTreeMap<RegionKey, DataSpec>,
        data: &mut Dataset,
        rng: &mut R,
    ) -> Result<usize, CegisError> {
        let set = specs.get(&obligation.region).map(|s| &s.set);
        let points = match outcome {
            ObligationOutcome::Verified => return Ok(0),
            ObligationOutcome::Counterexample(cex) => self.neighbourhood(cex, set, rng),
            ObligationOutcome::Unknown { .. } => match set {
                Some(set) if self.resample > 0 => {
                    let fresh = set.sample(self.resample, rng)?;
                    fresh.rows().into_iter().map(|r| r.to_vec()).collect()
                }
                _ => return Ok(0),
            },
        };
        let added = data.add_points(obligation.region, &points, self.epsilon)?;
        debug!(
            obligation = obligation.name,
            region = %obligation.region,
            proposed = points.len(),
            added,
            "refined data"
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{NetRole, ProbeGrad};
    use crate::verifier::UnknownReason;
    use ndarray::Array1;
    use certa_smt::terms::SmtTerm;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn refiner() -> Refiner {
        Refiner {
            cloud: 8,
            spread: 0.05,
            resample: 5,
            epsilon: 1e-9,
        }
    }

    fn obligation() -> Obligation {
        Obligation {
            name: "decrease",
            region: RegionKey::Lie,
            domain: SmtTerm::bool(true),
            requirement: SmtTerm::bool(true),
            bounds: (vec![-1.0, -1.0], vec![1.0, 1.0]),
        }
    }

    fn specs() -> BTreeMap<RegionKey, DataSpec> {
        let mut specs = BTreeMap::new();
        specs.insert(
            RegionKey::Lie,
            DataSpec::new(Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]), 10),
        );
        specs
    }

    #[test]
    fn counterexample_is_added_with_neighbours_inside_the_set() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut data = Dataset::empty(2);
        let cex = ObligationOutcome::Counterexample(CounterExample {
            point: vec![0.99, 0.0],
            region: RegionKey::Lie,
            obligation: "decrease",
        });
        let added = refiner()
            .refine(&cex, &obligation(), &specs(), &mut data, &mut rng)
            .expect("refine");
        assert!(added >= 1);
        let points = data.points(RegionKey::Lie);
        assert_eq!(points.row(0).to_vec(), vec![0.99, 0.0]);
        for row in points.rows().into_iter().skip(1) {
            assert!(row[0] <= 1.0, "neighbour {row} left the data set");
        }
    }

    #[test]
    fn counterexample_outside_the_set_is_still_kept() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut data = Dataset::empty(2);
        let cex = ObligationOutcome::Counterexample(CounterExample {
            point: vec![5.0, 5.0],
            region: RegionKey::Lie,
            obligation: "decrease",
        });
        let added = refiner()
            .refine(&cex, &obligation(), &specs(), &mut data, &mut rng)
            .expect("refine");
        assert_eq!(added, 1);
    }

    #[test]
    fn unknown_outcome_resamples_the_region() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut data = Dataset::empty(2);
        let unknown = ObligationOutcome::Unknown {
            reason: UnknownReason::Timeout,
            detail: "timeout".into(),
        };
        let added = refiner()
            .refine(&unknown, &obligation(), &specs(), &mut data, &mut rng)
            .expect("refine");
        assert_eq!(added, 5);
        assert_eq!(data.len(RegionKey::Lie), 5);
    }

    fn lie_loss(value: [f64; 3], flow: [f64; 3]) -> LossTerms {
        LossTerms {
            total: 1.0,
            terms: vec![("decrease", 1.0)],
            grads: vec![ProbeGrad {
                value: Array1::from(value.to_vec()),
                flow: Array1::from(flow.to_vec()),
            }],
        }
    }

    fn lie_data() -> Dataset {
        let mut data = Dataset::empty(2);
        let points = vec![vec![-0.5, 0.0], vec![0.0, 0.0], vec![0.5, 0.5]];
        data.add_points(RegionKey::Lie, &points, 1e-9)
            .expect("seed data");
        data
    }

    #[test]
    fn violations_are_the_points_with_active_gradients() {
        let probes = [Probe::flow(RegionKey::Lie, NetRole::Primary)];
        let loss = lie_loss([0.0, 0.0, 0.0], [0.5, 0.0, 0.0]);
        let hits = Refiner::violations(&probes, &loss, &lie_data());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[&RegionKey::Lie], vec![vec![-0.5, 0.0]]);
    }

    #[test]
    fn satisfied_data_has_no_violations() {
        let probes = [Probe::flow(RegionKey::Lie, NetRole::Primary)];
        let loss = lie_loss([0.0; 3], [0.0; 3]);
        assert!(Refiner::violations(&probes, &loss, &lie_data()).is_empty());
    }

    #[test]
    fn reinforce_adds_neighbours_inside_the_region_set() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = lie_data();
        let probes = [Probe::flow(RegionKey::Lie, NetRole::Primary)];
        let loss = lie_loss([0.0, 0.0, 0.0], [0.5, 0.0, 0.5]);
        let hits = Refiner::violations(&probes, &loss, &data);
        let added = refiner()
            .reinforce(&hits, &specs(), &mut data, &mut rng)
            .expect("reinforce");
        assert!(added > 0);
        assert_eq!(data.len(RegionKey::Lie), 3 + added);
        for row in data.points(RegionKey::Lie).rows() {
            assert!(row.iter().all(|x| x.abs() <= 1.0), "point {row} left the set");
        }
    }

    #[test]
    fn verified_adds_nothing() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut data = Dataset::empty(2);
        let added = refiner()
            .refine(
                &ObligationOutcome::Verified,
                &obligation(),
                &specs(),
                &mut data,
                &mut rng,
            )
            .expect("refine");
        assert_eq!(added, 0);
        assert_eq!(data.total(), 0);
    }
}
