//! Benchmark dynamics.
//!
//! Every model has its equilibrium at the origin. Controlled models are
//! given in open loop; `u` is the controller output.

use certa_engine::system::{Dynamics, Scalar};

fn c<T: Scalar>(value: f64) -> T {
    T::constant(value)
}

/// Planar linear rotation with decay: `x0' = a x0 - b x1`, `x1' = b x0 + a x1`.
///
/// In continuous time it is stable for `a < 0`; as a discrete map for
/// `a^2 + b^2 < 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spiral {
    name: &'static str,
    a: f64,
    b: f64,
}

impl Spiral {
    pub fn new(name: &'static str, a: f64, b: f64) -> Self {
        Self { name, a, b }
    }

    /// `x0' = -x0 - x1`, `x1' = x0 - x1`.
    pub fn linear0() -> Self {
        Self::new("linear0", -1.0, 1.0)
    }

    /// `x0+ = 0.5 x0 + 0.1 x1`, `x1+ = -0.1 x0 + 0.5 x1`.
    pub fn contraction() -> Self {
        Self::new("discrete_contraction", 0.5, -0.1)
    }
}

impl Dynamics for Spiral {
    fn name(&self) -> &str {
        self.name
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn f<T: Scalar>(&self, x: &[T], _u: &[T]) -> Vec<T> {
        let (x0, x1) = (x[0].clone(), x[1].clone());
        vec![
            c::<T>(self.a) * x0.clone() - c::<T>(self.b) * x1.clone(),
            c::<T>(self.b) * x0 + c::<T>(self.a) * x1,
        ]
    }
}

/// Integrator chain closed by linear state feedback.
///
/// `x_i' = x_{i+1}` and `x_{n-1}' = -(c_0 x_0 + ... + c_{n-1} x_{n-1})`, so
/// the characteristic polynomial is `s^n + c_{n-1} s^{n-1} + ... + c_0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Companion {
    name: &'static str,
    coefficients: Vec<f64>,
}

impl Companion {
    pub fn new(name: &'static str, coefficients: Vec<f64>) -> Self {
        Self { name, coefficients }
    }

    /// Double integrator under the LQR gain `K = [1, sqrt(3)]`.
    pub fn second_order_lqr() -> Self {
        Self::new("second_order_lqr", vec![1.0, 3f64.sqrt()])
    }

    /// Triple integrator under `K = [1, 1 + sqrt(2), 1 + sqrt(2)]`.
    pub fn third_order_lqr() -> Self {
        let k = 1.0 + 2f64.sqrt();
        Self::new("third_order_lqr", vec![1.0, k, k])
    }

    /// Eighth-order chain with poles at `-1, -1, -2, -2, -3, -3, -4, -4`.
    pub fn hi_ord_8() -> Self {
        Self::new(
            "hi_ord_8",
            vec![576.0, 2400.0, 4180.0, 3980.0, 2273.0, 800.0, 170.0, 20.0],
        )
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl Dynamics for Companion {
    fn name(&self) -> &str {
        self.name
    }

    fn state_dim(&self) -> usize {
        self.coefficients.len()
    }

    fn f<T: Scalar>(&self, x: &[T], _u: &[T]) -> Vec<T> {
        let n = self.coefficients.len();
        let mut dx: Vec<T> = x[1..n].to_vec();
        let feedback = self
            .coefficients
            .iter()
            .zip(x)
            .fold(c::<T>(0.0), |acc, (k, xi)| acc + c::<T>(*k) * xi.clone());
        dx.push(-feedback);
        dx
    }
}

/// Unstable planar system with one input per state.
///
/// `x0' = x0 + x1 + u0`, `x1' = x0 x1 - x1 + u1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Benchmark1;

impl Dynamics for Benchmark1 {
    fn name(&self) -> &str {
        "benchmark1"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        2
    }

    fn f<T: Scalar>(&self, x: &[T], u: &[T]) -> Vec<T> {
        let (x0, x1) = (x[0].clone(), x[1].clone());
        vec![
            x0.clone() + x1.clone() + u[0].clone(),
            x0 * x1.clone() - x1 + u[1].clone(),
        ]
    }
}

/// Cubic-damped chain with a single input on the second state.
///
/// `x0' = x1 - x0^3`, `x1' = u0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecondOrder;

impl Dynamics for SecondOrder {
    fn name(&self) -> &str {
        "second_order"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn f<T: Scalar>(&self, x: &[T], u: &[T]) -> Vec<T> {
        vec![x[1].clone() - x[0].clone().powi(3), u[0].clone()]
    }
}

/// Lorenz system with additive actuation on every state.
#[derive(Debug, Clone, PartialEq)]
pub struct LorenzControlled {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for LorenzControlled {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl Dynamics for LorenzControlled {
    fn name(&self) -> &str {
        "lorenz_controlled"
    }

    fn state_dim(&self) -> usize {
        3
    }

    fn control_dim(&self) -> usize {
        3
    }

    fn f<T: Scalar>(&self, x: &[T], u: &[T]) -> Vec<T> {
        let (x0, x1, x2) = (x[0].clone(), x[1].clone(), x[2].clone());
        vec![
            c::<T>(self.sigma) * (x1.clone() - x0.clone()) + u[0].clone(),
            c::<T>(self.rho) * x0.clone() - x1.clone() - x0.clone() * x2.clone() + u[1].clone(),
            x0 * x1 - c::<T>(self.beta) * x2 + u[2].clone(),
        ]
    }
}
