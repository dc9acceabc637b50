#![allow(dead_code)]

use std::sync::Arc;

use certa_engine::config::{ActivationType, CegisConfig, CertificateType, RegionKey};
use certa_engine::domains::Set;
use certa_engine::system::{Dynamics, LinearSystem, Scalar, System};

/// `x' = u`, driven entirely by the controller.
pub struct SingleIntegrator;

impl Dynamics for SingleIntegrator {
    fn name(&self) -> &str {
        "single_integrator"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        2
    }

    fn f<T: Scalar>(&self, _x: &[T], u: &[T]) -> Vec<T> {
        vec![u[0].clone(), u[1].clone()]
    }
}

pub fn linear(a: Vec<Vec<f64>>) -> Arc<dyn System> {
    Arc::new(LinearSystem::new(a).expect("square matrix"))
}

pub fn square_domain(dim: usize, half_width: f64) -> Set {
    Set::rectangle(vec![-half_width; dim], vec![half_width; dim])
}

/// Global Lyapunov problem on `[-1, 1]^2` with a 5-unit quadratic network.
pub fn lyapunov_2d() -> CegisConfig {
    let mut config = CegisConfig::new(2, CertificateType::Lyapunov)
        .with_network(vec![5], vec![ActivationType::Square])
        .with_domain(RegionKey::Lie, square_domain(2, 1.0))
        .with_data(RegionKey::Lie, square_domain(2, 1.0), 500);
    config.cegis_max_iters = 10;
    config.origin_tolerance = 0.1;
    config.learner.margin = 0.1;
    config.seed = 167;
    config
}

/// Barrier problem for `x' = -x`: start near the origin, stay out of the
/// strip `x0 >= 1`.
pub fn barrier_2d() -> CegisConfig {
    let lie = square_domain(2, 2.0);
    let unsafe_ = Set::rectangle(vec![1.0, -2.0], vec![2.0, 2.0]);
    let init = Set::sphere(vec![0.0, 0.0], 0.5);
    let mut config = CegisConfig::new(2, CertificateType::Barrier)
        .with_network(vec![4], vec![ActivationType::Linear])
        .with_domain(RegionKey::Lie, lie.clone())
        .with_domain(RegionKey::Init, init.clone())
        .with_domain(RegionKey::Unsafe, unsafe_.clone())
        .with_data(RegionKey::Lie, lie, 500)
        .with_data(RegionKey::Init, init, 200)
        .with_data(RegionKey::Unsafe, unsafe_, 200);
    config.rounding = Some(2);
    config.cegis_max_iters = 10;
    config.seed = 3;
    config
}

/// Reach-while-stay around the origin for a controlled single integrator.
pub fn rws_controlled() -> CegisConfig {
    let lie = square_domain(2, 2.0);
    let safe = square_domain(2, 1.5);
    let init = Set::sphere(vec![0.0, 0.0], 1.0);
    let goal = Set::sphere(vec![0.0, 0.0], 0.1);
    let unsafe_data = Set::set_minus(lie.clone(), safe.clone());
    let mut config = CegisConfig::new(2, CertificateType::Rws)
        .with_network(vec![6], vec![ActivationType::Poly2])
        .with_controller(vec![15, 2], vec![ActivationType::Linear])
        .with_domain(RegionKey::Lie, lie.clone())
        .with_domain(RegionKey::Init, init.clone())
        .with_domain(RegionKey::Safe, safe.clone())
        .with_domain(RegionKey::SafeBorder, safe)
        .with_domain(RegionKey::Goal, goal)
        .with_data(RegionKey::Lie, lie, 500)
        .with_data(RegionKey::Init, init, 200)
        .with_data(RegionKey::Unsafe, unsafe_data, 200);
    config.cegis_max_iters = 5;
    config.learner.max_steps = 400;
    config.seed = 11;
    config
}
