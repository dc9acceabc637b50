//! Regions of state space.
//!
//! Every [`Set`] answers three questions about the same set of points:
//! numeric membership ([`Set::contains`]), an exact symbolic membership
//! predicate ([`Set::predicate`]) and a finite sample ([`Set::sample`]).
//! Sampling always ends with a `contains` filter, so sampled points satisfy
//! the predicate by construction.

use std::fmt;

use certa_smt::terms::SmtTerm;
use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::CegisError;

/// Proposal rounds before sampling gives up.
const MAX_SAMPLING_ROUNDS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Set {
    /// Axis-aligned box; infinite bounds are allowed and left out of predicates.
    Rectangle { lower: Vec<f64>, upper: Vec<f64> },
    /// Closed ball.
    Sphere { centre: Vec<f64>, radius: f64 },
    /// Closed annulus `inner <= |x - centre| <= outer`.
    Torus {
        centre: Vec<f64>,
        outer: f64,
        inner: f64,
    },
    SetMinus { minuend: Box<Set>, subtrahend: Box<Set> },
    /// Everything outside `inner`; samples are drawn from `superset`.
    Complement { inner: Box<Set>, superset: Box<Set> },
    Union(Box<Set>, Box<Set>),
    Intersection(Box<Set>, Box<Set>),
}

impl Set {
    pub fn rectangle(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Set::Rectangle { lower, upper }
    }

    /// `[-inf, inf]^n`.
    pub fn unbounded(n: usize) -> Self {
        Set::Rectangle {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn sphere(centre: Vec<f64>, radius: f64) -> Self {
        Set::Sphere { centre, radius }
    }

    pub fn torus(centre: Vec<f64>, outer: f64, inner: f64) -> Self {
        Set::Torus {
            centre,
            outer,
            inner,
        }
    }

    pub fn set_minus(minuend: Set, subtrahend: Set) -> Self {
        Set::SetMinus {
            minuend: Box::new(minuend),
            subtrahend: Box::new(subtrahend),
        }
    }

    pub fn complement(inner: Set, superset: Set) -> Self {
        Set::Complement {
            inner: Box::new(inner),
            superset: Box::new(superset),
        }
    }

    pub fn union(a: Set, b: Set) -> Self {
        Set::Union(Box::new(a), Box::new(b))
    }

    pub fn intersection(a: Set, b: Set) -> Self {
        Set::Intersection(Box::new(a), Box::new(b))
    }

    pub fn dimension(&self) -> usize {
        match self {
            Set::Rectangle { lower, .. } => lower.len(),
            Set::Sphere { centre, .. } | Set::Torus { centre, .. } => centre.len(),
            Set::SetMinus { minuend, .. } => minuend.dimension(),
            Set::Complement { inner, .. } => inner.dimension(),
            Set::Union(a, _) | Set::Intersection(a, _) => a.dimension(),
        }
    }

    /// Validate shapes and return the dimension.
    pub fn check(&self) -> Result<usize, CegisError> {
        let bad = |msg: String| Err(CegisError::Dimension(msg));
        match self {
            Set::Rectangle { lower, upper } => {
                if lower.len() != upper.len() {
                    return bad(format!(
                        "rectangle bounds have lengths {} and {}",
                        lower.len(),
                        upper.len()
                    ));
                }
                if lower.iter().zip(upper).any(|(l, u)| l > u || l.is_nan() || u.is_nan()) {
                    return Err(CegisError::ConfigurationInvalid(format!(
                        "rectangle has an empty side: {self}"
                    )));
                }
                Ok(lower.len())
            }
            Set::Sphere { centre, radius } => {
                if !(*radius >= 0.0) || !radius.is_finite() {
                    return Err(CegisError::ConfigurationInvalid(format!(
                        "sphere radius must be finite and non-negative, got {radius}"
                    )));
                }
                Ok(centre.len())
            }
            Set::Torus {
                centre,
                outer,
                inner,
            } => {
                if !(*inner >= 0.0 && inner <= outer && outer.is_finite()) {
                    return Err(CegisError::ConfigurationInvalid(format!(
                        "torus needs 0 <= inner <= outer < inf, got inner {inner}, outer {outer}"
                    )));
                }
                Ok(centre.len())
            }
            Set::SetMinus {
                minuend: a,
                subtrahend: b,
            }
            | Set::Complement {
                inner: a,
                superset: b,
            }
            | Set::Union(a, b)
            | Set::Intersection(a, b) => {
                let (da, db) = (a.check()?, b.check()?);
                if da != db {
                    return bad(format!("combined sets have dimensions {da} and {db}"));
                }
                Ok(da)
            }
        }
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        match self {
            Set::Rectangle { lower, upper } => x
                .iter()
                .zip(lower.iter().zip(upper))
                .all(|(v, (l, u))| l <= v && v <= u),
            Set::Sphere { centre, radius } => sq_dist(x, centre) <= radius * radius,
            Set::Torus {
                centre,
                outer,
                inner,
            } => {
                let d = sq_dist(x, centre);
                inner * inner <= d && d <= outer * outer
            }
            Set::SetMinus {
                minuend,
                subtrahend,
            } => minuend.contains(x) && !subtrahend.contains(x),
            Set::Complement { inner, .. } => !inner.contains(x),
            Set::Union(a, b) => a.contains(x) || b.contains(x),
            Set::Intersection(a, b) => a.contains(x) && b.contains(x),
        }
    }

    /// Symbolic membership over `vars`.
    pub fn predicate(&self, vars: &[SmtTerm]) -> SmtTerm {
        match self {
            Set::Rectangle { lower, upper } => {
                let mut atoms = Vec::new();
                for ((x, l), u) in vars.iter().zip(lower).zip(upper) {
                    if l.is_finite() {
                        atoms.push(x.clone().ge(SmtTerm::num(*l)));
                    }
                    if u.is_finite() {
                        atoms.push(x.clone().le(SmtTerm::num(*u)));
                    }
                }
                SmtTerm::and(atoms)
            }
            Set::Sphere { centre, radius } => {
                sq_dist_term(vars, centre).le(SmtTerm::num(*radius).powi(2))
            }
            Set::Torus {
                centre,
                outer,
                inner,
            } => {
                let d = sq_dist_term(vars, centre);
                SmtTerm::and(vec![
                    d.clone().ge(SmtTerm::num(*inner).powi(2)),
                    d.le(SmtTerm::num(*outer).powi(2)),
                ])
            }
            Set::SetMinus {
                minuend,
                subtrahend,
            } => SmtTerm::and(vec![
                minuend.predicate(vars),
                subtrahend.predicate(vars).not(),
            ]),
            Set::Complement { inner, .. } => inner.predicate(vars).not(),
            Set::Union(a, b) => SmtTerm::or(vec![a.predicate(vars), b.predicate(vars)]),
            Set::Intersection(a, b) => {
                SmtTerm::and(vec![a.predicate(vars), b.predicate(vars)])
            }
        }
    }

    pub fn has_border(&self) -> bool {
        matches!(self, Set::Rectangle { .. } | Set::Sphere { .. })
    }

    /// Symbolic predicate for the boundary of a rectangle or sphere.
    pub fn border_predicate(&self, vars: &[SmtTerm]) -> Result<SmtTerm, CegisError> {
        match self {
            Set::Rectangle { lower, upper } => {
                let mut faces = Vec::new();
                for ((x, l), u) in vars.iter().zip(lower).zip(upper) {
                    if l.is_finite() {
                        faces.push(x.clone().eq(SmtTerm::num(*l)));
                    }
                    if u.is_finite() {
                        faces.push(x.clone().eq(SmtTerm::num(*u)));
                    }
                }
                Ok(SmtTerm::and(vec![self.predicate(vars), SmtTerm::or(faces)]))
            }
            Set::Sphere { centre, radius } => {
                Ok(sq_dist_term(vars, centre).eq(SmtTerm::num(*radius).powi(2)))
            }
            other => Err(CegisError::ConfigurationInvalid(format!(
                "no border predicate for {other}"
            ))),
        }
    }

    /// Smallest axis-aligned box known to contain the set.
    pub fn bounding_box(&self) -> (Vec<f64>, Vec<f64>) {
        match self {
            Set::Rectangle { lower, upper } => (lower.clone(), upper.clone()),
            Set::Sphere { centre, radius } => ball_box(centre, *radius),
            Set::Torus { centre, outer, .. } => ball_box(centre, *outer),
            Set::SetMinus { minuend, .. } => minuend.bounding_box(),
            Set::Complement { superset, .. } => superset.bounding_box(),
            Set::Union(a, b) => {
                let ((al, au), (bl, bu)) = (a.bounding_box(), b.bounding_box());
                (
                    al.iter().zip(&bl).map(|(x, y)| x.min(*y)).collect(),
                    au.iter().zip(&bu).map(|(x, y)| x.max(*y)).collect(),
                )
            }
            Set::Intersection(a, b) => {
                let ((al, au), (bl, bu)) = (a.bounding_box(), b.bounding_box());
                (
                    al.iter().zip(&bl).map(|(x, y)| x.max(*y)).collect(),
                    au.iter().zip(&bu).map(|(x, y)| x.min(*y)).collect(),
                )
            }
        }
    }

    /// Draw `n` points from the set, one per row.
    ///
    /// Candidates are proposed from the variant's distribution and filtered
    /// through [`Set::contains`]. Fails with
    /// [`CegisError::SamplingExhausted`] if too few survive.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>, CegisError> {
        let dim = self.dimension();
        let mut flat = Vec::with_capacity(n * dim);
        let mut produced = 0;
        let mut proposed = 0;
        for _ in 0..MAX_SAMPLING_ROUNDS {
            if produced == n {
                break;
            }
            let batch = self.propose((n - produced).max(16), rng)?;
            proposed += batch.len();
            for point in batch {
                if self.contains(&point) {
                    flat.extend_from_slice(&point);
                    produced += 1;
                    if produced == n {
                        break;
                    }
                }
            }
        }
        if produced < n {
            return Err(CegisError::SamplingExhausted {
                set: self.to_string(),
                requested: n,
                produced,
                attempts: proposed,
            });
        }
        Array2::from_shape_vec((n, dim), flat).map_err(|e| CegisError::Dimension(e.to_string()))
    }

    fn propose<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<Vec<f64>>, CegisError> {
        match self {
            Set::Rectangle { lower, upper } => {
                if lower.iter().chain(upper).any(|b| !b.is_finite()) {
                    return Err(CegisError::ConfigurationInvalid(format!(
                        "cannot sample the unbounded set {self}"
                    )));
                }
                Ok((0..k)
                    .map(|_| {
                        lower
                            .iter()
                            .zip(upper)
                            .map(|(l, u)| l + (u - l) * rng.random::<f64>())
                            .collect()
                    })
                    .collect())
            }
            Set::Sphere { centre, radius } => {
                Ok((0..k).map(|_| shell_point(centre, 0.0, *radius, rng)).collect())
            }
            Set::Torus {
                centre,
                outer,
                inner,
            } => Ok((0..k)
                .map(|_| shell_point(centre, *inner, *outer, rng))
                .collect()),
            Set::SetMinus { minuend, .. } => minuend.propose(k, rng),
            Set::Complement { superset, .. } => superset.propose(k, rng),
            Set::Union(a, b) => {
                let from_a = a.propose(k, rng)?;
                let from_b = b.propose(k, rng)?;
                Ok(from_a
                    .into_iter()
                    .zip(from_b)
                    .map(|(p, q)| if rng.random::<bool>() { p } else { q })
                    .collect())
            }
            Set::Intersection(a, _) => a.propose(k, rng),
        }
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Set::Rectangle { lower, upper } => write!(f, "Rectangle({lower:?}, {upper:?})"),
            Set::Sphere { centre, radius } => write!(f, "Sphere({centre:?}, {radius})"),
            Set::Torus {
                centre,
                outer,
                inner,
            } => write!(f, "Torus({centre:?}, {outer}, {inner})"),
            Set::SetMinus {
                minuend,
                subtrahend,
            } => write!(f, "({minuend} \\ {subtrahend})"),
            Set::Complement { inner, superset } => write!(f, "({superset} \\ {inner})"),
            Set::Union(a, b) => write!(f, "({a} | {b})"),
            Set::Intersection(a, b) => write!(f, "({a} & {b})"),
        }
    }
}

fn sq_dist(x: &[f64], centre: &[f64]) -> f64 {
    x.iter().zip(centre).map(|(a, c)| (a - c) * (a - c)).sum()
}

fn sq_dist_term(vars: &[SmtTerm], centre: &[f64]) -> SmtTerm {
    SmtTerm::sum(
        vars.iter()
            .zip(centre)
            .map(|(x, c)| (x.clone() - SmtTerm::num(*c)).powi(2)),
    )
}

fn ball_box(centre: &[f64], radius: f64) -> (Vec<f64>, Vec<f64>) {
    (
        centre.iter().map(|c| c - radius).collect(),
        centre.iter().map(|c| c + radius).collect(),
    )
}

/// Uniform point in the shell `inner <= |x - centre| <= outer`.
fn shell_point<R: Rng + ?Sized>(centre: &[f64], inner: f64, outer: f64, rng: &mut R) -> Vec<f64> {
    let n = centre.len();
    let mut dir: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let norm = dir.iter().map(|d| d * d).sum::<f64>().sqrt();
    if norm == 0.0 {
        return centre.to_vec();
    }
    // radius with density proportional to r^(n-1)
    let dim = n as f64;
    let (lo, hi) = (inner.powf(dim), outer.powf(dim));
    let r = (lo + (hi - lo) * rng.random::<f64>()).powf(1.0 / dim);
    for (d, c) in dir.iter_mut().zip(centre) {
        *d = c + r * *d / norm;
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vars(n: usize) -> Vec<SmtTerm> {
        (0..n).map(|i| SmtTerm::var(format!("x{i}"))).collect()
    }

    fn holds(term: &SmtTerm, point: &[f64]) -> bool {
        let env = |name: &str| {
            name.strip_prefix('x')
                .and_then(|i| i.parse::<usize>().ok())
                .and_then(|i| point.get(i).copied())
        };
        term.eval_bool(&env).expect("closed predicate")
    }

    #[test]
    fn rectangle_sample_lies_inside() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = Set::rectangle(vec![-1.0, 2.0], vec![1.0, 3.0]);
        let pts = set.sample(200, &mut rng).expect("sample");
        assert_eq!(pts.dim(), (200, 2));
        for row in pts.rows() {
            assert!((-1.0..=1.0).contains(&row[0]));
            assert!((2.0..=3.0).contains(&row[1]));
        }
    }

    #[test]
    fn torus_samples_avoid_the_hole() {
        let mut rng = StdRng::seed_from_u64(2);
        let set = Set::torus(vec![0.0, 0.0], 2.0, 1.0);
        let pts = set.sample(300, &mut rng).expect("sample");
        for row in pts.rows() {
            let r = (row[0] * row[0] + row[1] * row[1]).sqrt();
            assert!((1.0 - 1e-9..=2.0 + 1e-9).contains(&r), "radius {r}");
        }
    }

    #[test]
    fn set_minus_excludes_subtrahend() {
        let mut rng = StdRng::seed_from_u64(3);
        let outer = Set::rectangle(vec![-2.0, -2.0], vec![2.0, 2.0]);
        let hole = Set::sphere(vec![0.0, 0.0], 1.0);
        let set = Set::set_minus(outer, hole.clone());
        let pts = set.sample(300, &mut rng).expect("sample");
        for row in pts.rows() {
            assert!(!hole.contains(row.as_slice().expect("contiguous")));
        }
    }

    #[test]
    fn complement_samples_from_superset() {
        let mut rng = StdRng::seed_from_u64(4);
        let set = Set::complement(
            Set::sphere(vec![0.0, 0.0], 0.5),
            Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]),
        );
        let pts = set.sample(100, &mut rng).expect("sample");
        for row in pts.rows() {
            let p = row.as_slice().expect("contiguous");
            assert!(p[0] * p[0] + p[1] * p[1] > 0.25);
            assert!(p.iter().all(|v| v.abs() <= 1.0));
        }
        assert_eq!(set.bounding_box(), (vec![-1.0, -1.0], vec![1.0, 1.0]));
    }

    #[test]
    fn impossible_rejection_reports_exhaustion() {
        let mut rng = StdRng::seed_from_u64(5);
        let square = Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]);
        let set = Set::set_minus(square.clone(), square);
        match set.sample(10, &mut rng) {
            Err(CegisError::SamplingExhausted {
                requested,
                produced,
                attempts,
                ..
            }) => {
                assert_eq!(requested, 10);
                assert_eq!(produced, 0);
                assert!(attempts > 0);
            }
            other => panic!("expected SamplingExhausted, got {other:?}"),
        }
    }

    #[test]
    fn unbounded_rectangle_cannot_be_sampled() {
        let mut rng = StdRng::seed_from_u64(6);
        assert!(matches!(
            Set::unbounded(2).sample(1, &mut rng),
            Err(CegisError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn unbounded_rectangle_predicate_is_true() {
        assert_eq!(Set::unbounded(3).predicate(&vars(3)), SmtTerm::bool(true));
    }

    #[test]
    fn predicate_agrees_with_contains() {
        let set = Set::union(
            Set::sphere(vec![1.0, 0.0], 0.5),
            Set::intersection(
                Set::rectangle(vec![-1.0, -1.0], vec![0.0, 1.0]),
                Set::complement(
                    Set::sphere(vec![-0.5, 0.0], 0.25),
                    Set::rectangle(vec![-2.0, -2.0], vec![2.0, 2.0]),
                ),
            ),
        );
        let pred = set.predicate(&vars(2));
        let points = [
            [1.2, 0.1],
            [-0.5, 0.0],
            [-0.9, 0.9],
            [0.5, 0.5],
            [1.6, 0.0],
            [-0.5, 0.3],
        ];
        for p in points {
            assert_eq!(holds(&pred, &p), set.contains(&p), "at {p:?}");
        }
    }

    #[test]
    fn rectangle_border_predicate_hits_faces_only() {
        let set = Set::rectangle(vec![-1.0, -1.0], vec![1.0, 1.0]);
        let border = set.border_predicate(&vars(2)).expect("rectangle border");
        assert!(holds(&border, &[1.0, 0.3]));
        assert!(holds(&border, &[-0.2, -1.0]));
        assert!(!holds(&border, &[0.0, 0.0]));
        assert!(!holds(&border, &[2.0, 1.0]));
    }

    #[test]
    fn torus_has_no_border_predicate() {
        let set = Set::torus(vec![0.0], 2.0, 1.0);
        assert!(!set.has_border());
        assert!(set.border_predicate(&vars(1)).is_err());
    }

    #[test]
    fn check_rejects_mixed_dimensions() {
        let set = Set::union(Set::sphere(vec![0.0], 1.0), Set::sphere(vec![0.0, 0.0], 1.0));
        assert!(matches!(set.check(), Err(CegisError::Dimension(_))));
        let set = Set::rectangle(vec![1.0], vec![0.0]);
        assert!(matches!(set.check(), Err(CegisError::ConfigurationInvalid(_))));
    }

    #[test]
    fn zero_samples_is_an_empty_matrix() {
        let mut rng = StdRng::seed_from_u64(7);
        let pts = Set::sphere(vec![0.0; 3], 1.0).sample(0, &mut rng).expect("sample");
        assert_eq!(pts.dim(), (0, 3));
    }
}
