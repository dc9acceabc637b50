//! Dynamical system interface.
//!
//! Models implement [`Dynamics`] once, generically over [`Scalar`], and get
//! both the numeric evaluator and the symbolic generator of [`System`] from
//! the blanket impl.

use std::ops::{Add, Div, Mul, Neg, Sub};

use certa_smt::terms::SmtTerm;
use ndarray::Array2;

use crate::error::CegisError;

/// Numbers a model can be written over: `f64` for simulation and training,
/// [`SmtTerm`] for verification.
pub trait Scalar:
    Clone
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn constant(value: f64) -> Self;
    fn powi(self, n: u32) -> Self;
    fn exp(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn powi(self, n: u32) -> Self {
        f64::powi(self, n as i32)
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }

    fn tanh(self) -> Self {
        f64::tanh(self)
    }
}

impl Scalar for SmtTerm {
    fn constant(value: f64) -> Self {
        SmtTerm::num(value)
    }

    fn powi(self, n: u32) -> Self {
        SmtTerm::powi(self, n)
    }

    fn exp(self) -> Self {
        SmtTerm::exp(self)
    }

    fn sin(self) -> Self {
        SmtTerm::sin(self)
    }

    fn cos(self) -> Self {
        SmtTerm::cos(self)
    }

    fn tanh(self) -> Self {
        SmtTerm::tanh(self)
    }
}

/// A model written once over any [`Scalar`].
///
/// `f` returns the state derivative for continuous-time runs and the next
/// state for discrete-time runs. `u` is empty for autonomous systems.
pub trait Dynamics: Send + Sync {
    fn name(&self) -> &str;
    fn state_dim(&self) -> usize;
    fn control_dim(&self) -> usize {
        0
    }
    fn f<T: Scalar>(&self, x: &[T], u: &[T]) -> Vec<T>;
}

/// Object-safe view of a model used by the engine.
pub trait System: Send + Sync {
    fn name(&self) -> &str;
    fn state_dim(&self) -> usize;
    fn control_dim(&self) -> usize;
    fn eval(&self, x: &[f64], u: &[f64]) -> Vec<f64>;
    fn symbolic(&self, x: &[SmtTerm], u: &[SmtTerm]) -> Vec<SmtTerm>;

    /// `∂f/∂u` at `(x, u)`, shape `state_dim × control_dim`, by central differences.
    fn control_jacobian(&self, x: &[f64], u: &[f64]) -> Array2<f64> {
        let (n, m) = (self.state_dim(), u.len());
        let mut jac = Array2::zeros((n, m));
        let mut probe = u.to_vec();
        for j in 0..m {
            let h = 1e-6 * (1.0 + u[j].abs());
            probe[j] = u[j] + h;
            let plus = self.eval(x, &probe);
            probe[j] = u[j] - h;
            let minus = self.eval(x, &probe);
            probe[j] = u[j];
            for i in 0..n {
                jac[[i, j]] = (plus[i] - minus[i]) / (2.0 * h);
            }
        }
        jac
    }
}

impl<D: Dynamics> System for D {
    fn name(&self) -> &str {
        Dynamics::name(self)
    }

    fn state_dim(&self) -> usize {
        Dynamics::state_dim(self)
    }

    fn control_dim(&self) -> usize {
        Dynamics::control_dim(self)
    }

    fn eval(&self, x: &[f64], u: &[f64]) -> Vec<f64> {
        self.f(x, u)
    }

    fn symbolic(&self, x: &[SmtTerm], u: &[SmtTerm]) -> Vec<SmtTerm> {
        self.f(x, u)
    }
}

/// `x' = A x` (or `x+ = A x` in discrete time).
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    name: String,
    a: Vec<Vec<f64>>,
}

impl LinearSystem {
    pub fn new(a: Vec<Vec<f64>>) -> Result<Self, CegisError> {
        Self::named("linear", a)
    }

    pub fn named(name: impl Into<String>, a: Vec<Vec<f64>>) -> Result<Self, CegisError> {
        let n = a.len();
        if n == 0 || a.iter().any(|row| row.len() != n) {
            return Err(CegisError::Dimension(format!(
                "linear system needs a non-empty square matrix, got {n} rows"
            )));
        }
        Ok(Self {
            name: name.into(),
            a,
        })
    }
}

impl Dynamics for LinearSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_dim(&self) -> usize {
        self.a.len()
    }

    fn f<T: Scalar>(&self, x: &[T], _u: &[T]) -> Vec<T> {
        self.a
            .iter()
            .map(|row| {
                row.iter()
                    .zip(x)
                    .filter(|(a, _)| **a != 0.0)
                    .fold(T::constant(0.0), |acc, (a, xi)| acc + T::constant(*a) * xi.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pendulum;

    impl Dynamics for Pendulum {
        fn name(&self) -> &str {
            "pendulum"
        }

        fn state_dim(&self) -> usize {
            2
        }

        fn control_dim(&self) -> usize {
            1
        }

        fn f<T: Scalar>(&self, x: &[T], u: &[T]) -> Vec<T> {
            vec![
                x[1].clone(),
                -x[0].clone().sin() - T::constant(0.5) * x[1].clone() + u[0].clone() * u[0].clone(),
            ]
        }
    }

    #[test]
    fn numeric_and_symbolic_dynamics_agree() {
        let sys = Pendulum;
        let point = [0.3, -0.7];
        let control = [0.4];
        let numeric = sys.eval(&point, &control);

        let xs = [SmtTerm::var("x0"), SmtTerm::var("x1")];
        let us = [SmtTerm::var("u0")];
        let symbolic = sys.symbolic(&xs, &us);
        let env = |name: &str| match name {
            "x0" => Some(point[0]),
            "x1" => Some(point[1]),
            "u0" => Some(control[0]),
            _ => None,
        };
        for (n, s) in numeric.iter().zip(&symbolic) {
            let value = s.eval_real(&env).expect("closed term");
            assert!((n - value).abs() < 1e-12, "{n} vs {value}");
        }
    }

    #[test]
    fn control_jacobian_matches_analytic() {
        let jac = Pendulum.control_jacobian(&[0.1, 0.2], &[0.5]);
        assert_eq!(jac.dim(), (2, 1));
        assert!(jac[[0, 0]].abs() < 1e-9);
        assert!((jac[[1, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn linear_system_skips_zero_entries() {
        let sys = LinearSystem::new(vec![vec![-1.0, 0.0], vec![2.0, -3.0]]).expect("square");
        let xs = [SmtTerm::var("x0"), SmtTerm::var("x1")];
        let f = sys.symbolic(&xs, &[]);
        assert_eq!(f[0], -SmtTerm::var("x0"));
        assert_eq!(sys.eval(&[1.0, 1.0], &[]), vec![-1.0, -1.0]);
    }

    #[test]
    fn non_square_matrix_rejected() {
        assert!(LinearSystem::new(vec![vec![1.0, 2.0]]).is_err());
        assert!(LinearSystem::new(Vec::new()).is_err());
    }
}
