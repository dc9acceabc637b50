//! Per-region sample sets. They only ever grow during a run.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};
use rand::Rng;
use tracing::debug;

use crate::config::{DataSpec, RegionKey};
use crate::error::CegisError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    regions: BTreeMap<RegionKey, Array2<f64>>,
    n_vars: usize,
}

impl Dataset {
    pub fn empty(n_vars: usize) -> Self {
        Self {
            regions: BTreeMap::new(),
            n_vars,
        }
    }

    /// Draw the initial sample for every region in `specs`.
    pub fn sample<R: Rng + ?Sized>(
        specs: &BTreeMap<RegionKey, DataSpec>,
        n_vars: usize,
        rng: &mut R,
    ) -> Result<Self, CegisError> {
        let mut data = Self::empty(n_vars);
        for (key, spec) in specs {
            let points = spec.set.sample(spec.count, rng)?;
            debug!(region = %key, points = points.nrows(), "sampled region");
            data.regions.insert(*key, points);
        }
        Ok(data)
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Points of a region; regions without data yield an empty matrix.
    pub fn points(&self, key: RegionKey) -> Array2<f64> {
        self.regions
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Array2::zeros((0, self.n_vars)))
    }

    pub fn get(&self, key: RegionKey) -> Option<&Array2<f64>> {
        self.regions.get(&key)
    }

    pub fn len(&self, key: RegionKey) -> usize {
        self.regions.get(&key).map_or(0, Array2::nrows)
    }

    pub fn total(&self) -> usize {
        self.regions.values().map(Array2::nrows).sum()
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionKey, &Array2<f64>)> {
        self.regions.iter().map(|(k, v)| (*k, v))
    }

    /// Append points to a region, skipping any within `epsilon` (max-norm)
    /// of a point already present. Returns how many were added.
    pub fn add_points(
        &mut self,
        key: RegionKey,
        points: &[Vec<f64>],
        epsilon: f64,
    ) -> Result<usize, CegisError> {
        let n_vars = self.n_vars;
        let region = self
            .regions
            .entry(key)
            .or_insert_with(|| Array2::zeros((0, n_vars)));
        let mut added = 0;
        for point in points {
            if point.len() != n_vars {
                return Err(CegisError::Dimension(format!(
                    "point of length {} added to `{key}` data of dimension {n_vars}",
                    point.len()
                )));
            }
            if point.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let duplicate = region.rows().into_iter().any(|row| {
                row.iter()
                    .zip(point)
                    .all(|(a, b)| (a - b).abs() <= epsilon)
            });
            if duplicate {
                continue;
            }
            region
                .push_row(ArrayView1::from(point.as_slice()))
                .map_err(|e| CegisError::Dimension(e.to_string()))?;
            added += 1;
        }
        Ok(added)
    }
}
