//! Ready-made synthesis problems.
//!
//! Each entry pairs a model from [`crate::systems`] with a complete
//! [`CegisConfig`]. All symbolic domains are bounded so every entry runs
//! under the built-in interval verifier.

use std::sync::Arc;

use certa_engine::config::{
    ActivationType, CegisConfig, CertificateType, RegionKey, TimeDomain,
};
use certa_engine::domains::Set;
use certa_engine::system::System;

use crate::systems::{Benchmark1, Companion, LorenzControlled, SecondOrder, Spiral};

/// A named problem: the model and the run configuration that targets it.
#[derive(Clone)]
pub struct Benchmark {
    pub name: &'static str,
    pub summary: &'static str,
    pub config: CegisConfig,
    pub system: Arc<dyn System>,
}

impl std::fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Benchmark")
            .field("name", &self.name)
            .field("system", &self.system.name())
            .field("certificate", &self.config.certificate)
            .finish_non_exhaustive()
    }
}

type Builder = fn() -> Benchmark;

const ENTRIES: &[(&str, Builder)] = &[
    ("lyap_linear", lyap_linear),
    ("lyap_discrete", lyap_discrete),
    ("ctrllyap_ct", ctrllyap_ct),
    ("ctrllyap_lorenz", ctrllyap_lorenz),
    ("hi_ord_8", hi_ord_8),
    ("rwa_2", rwa_2),
    ("rwa_3", rwa_3),
    ("rar_1", rar_1),
];

/// Names of every catalogued benchmark, in listing order.
pub fn names() -> impl Iterator<Item = &'static str> {
    ENTRIES.iter().map(|(name, _)| *name)
}

pub fn catalogue() -> Vec<Benchmark> {
    ENTRIES.iter().map(|(_, build)| build()).collect()
}

pub fn find(name: &str) -> Option<Benchmark> {
    ENTRIES
        .iter()
        .find(|(entry, _)| *entry == name)
        .map(|(_, build)| build())
}

/// `[-h_0, h_0] x ... x [-h_{n-1}, h_{n-1}]`.
fn centred_box(n: usize, half_width: f64) -> Set {
    Set::rectangle(vec![-half_width; n], vec![half_width; n])
}

fn lyap_linear() -> Benchmark {
    let domain = centred_box(2, 1.0);
    let mut config = CegisConfig::new(2, CertificateType::Lyapunov)
        .with_network(vec![5], vec![ActivationType::Square])
        .with_domain(RegionKey::Lie, domain)
        .with_data(RegionKey::Lie, Set::torus(vec![0.0, 0.0], 1.0, 0.01), 1000);
    config.llo = true;
    config.llo_radius = 0.1;
    config.learner.margin = 0.1;
    config.cegis_max_iters = 10;
    config.seed = 167;
    Benchmark {
        name: "lyap_linear",
        summary: "Lyapunov function for a stable linear spiral",
        config,
        system: Arc::new(Spiral::linear0()),
    }
}

fn lyap_discrete() -> Benchmark {
    let domain = centred_box(2, 1.0);
    let mut config = CegisConfig::new(2, CertificateType::Lyapunov)
        .with_network(vec![5], vec![ActivationType::Square])
        .with_domain(RegionKey::Lie, domain.clone())
        .with_data(RegionKey::Lie, domain, 1000);
    config.time_domain = TimeDomain::Discrete;
    config.origin_tolerance = 0.1;
    config.learner.margin = 0.1;
    config.cegis_max_iters = 10;
    config.seed = 3;
    Benchmark {
        name: "lyap_discrete",
        summary: "Lyapunov function for a discrete-time linear contraction",
        config,
        system: Arc::new(Spiral::contraction()),
    }
}

fn ctrllyap_ct() -> Benchmark {
    let domain = Set::torus(vec![0.0, 0.0], 10.0, 0.1);
    let mut config = CegisConfig::new(2, CertificateType::Lyapunov)
        .with_network(vec![4], vec![ActivationType::Square])
        .with_controller(vec![15, 2], vec![ActivationType::Linear])
        .with_domain(RegionKey::Lie, domain.clone())
        .with_data(RegionKey::Lie, domain, 5000);
    config.origin_tolerance = 0.1;
    config.cegis_max_iters = 25;
    config.seed = 167;
    Benchmark {
        name: "ctrllyap_ct",
        summary: "Lyapunov function and stabilising controller, two inputs",
        config,
        system: Arc::new(Benchmark1),
    }
}

fn ctrllyap_lorenz() -> Benchmark {
    let domain = Set::torus(vec![0.0; 3], 1.0, 0.1);
    let mut config = CegisConfig::new(3, CertificateType::Lyapunov)
        .with_network(vec![10], vec![ActivationType::Square])
        .with_controller(vec![10, 3], vec![ActivationType::Linear])
        .with_domain(RegionKey::Lie, domain.clone())
        .with_data(RegionKey::Lie, domain, 2000);
    config.llo = true;
    config.llo_radius = 0.1;
    config.cegis_max_iters = 25;
    config.seed = 167;
    Benchmark {
        name: "ctrllyap_lorenz",
        summary: "Lyapunov function and controller for the Lorenz system",
        config,
        system: Arc::new(LorenzControlled::default()),
    }
}

fn hi_ord_8() -> Benchmark {
    let n = 8;
    let lie = centred_box(n, 2.2);
    let init = Set::sphere(vec![1.0; n], 0.5);
    let unsafe_ = Set::sphere(vec![-2.0; n], 0.5);
    let mut config = CegisConfig::new(n, CertificateType::Barrier)
        .with_network(vec![10], vec![ActivationType::Linear])
        .with_domain(RegionKey::Lie, lie.clone())
        .with_domain(RegionKey::Init, init.clone())
        .with_domain(RegionKey::Unsafe, unsafe_.clone())
        .with_data(RegionKey::Lie, lie, 1000)
        .with_data(RegionKey::Init, init, 500)
        .with_data(RegionKey::Unsafe, unsafe_, 500);
    config.symmetric_belt = false;
    config.rounding = Some(2);
    config.cegis_max_iters = 25;
    config.seed = 167;
    Benchmark {
        name: "hi_ord_8",
        summary: "Barrier certificate for an eighth-order linear chain",
        config,
        system: Arc::new(Companion::hi_ord_8()),
    }
}

/// Nested boxes shared by the reach-while-stay and reach-and-remain
/// problems: domain, safe, initial and goal half-widths.
struct Boxes {
    domain: Set,
    safe: Set,
    init: Set,
    goal: Set,
}

impl Boxes {
    fn new(n: usize, domain: f64, safe: f64, init: f64, goal: f64) -> Self {
        Self {
            domain: centred_box(n, domain),
            safe: centred_box(n, safe),
            init: centred_box(n, init),
            goal: centred_box(n, goal),
        }
    }

    /// Domains and data common to every RWS-style problem. The flow region
    /// is the safe set with the goal removed.
    fn rws_config(&self, n: usize, certificate: CertificateType, samples: usize) -> CegisConfig {
        let lie = Set::set_minus(self.safe.clone(), self.goal.clone());
        CegisConfig::new(n, certificate)
            .with_domain(RegionKey::Lie, lie.clone())
            .with_domain(RegionKey::Init, self.init.clone())
            .with_domain(RegionKey::Safe, self.safe.clone())
            .with_domain(RegionKey::SafeBorder, self.safe.clone())
            .with_domain(RegionKey::Goal, self.goal.clone())
            .with_data(RegionKey::Lie, lie, samples)
            .with_data(RegionKey::Init, self.init.clone(), samples)
            .with_data(
                RegionKey::Unsafe,
                Set::set_minus(self.domain.clone(), self.safe.clone()),
                samples,
            )
    }
}

fn rwa_2() -> Benchmark {
    let boxes = Boxes::new(2, 1.5, 1.0, 0.5, 0.05);
    let mut config = boxes
        .rws_config(2, CertificateType::Rws, 1000)
        .with_network(vec![8], vec![ActivationType::Square])
        .with_controller(vec![8, 1], vec![ActivationType::Linear]);
    config.cegis_max_iters = 25;
    config.seed = 167;
    Benchmark {
        name: "rwa_2",
        summary: "Reach-while-stay certificate and controller, one input",
        config,
        system: Arc::new(SecondOrder),
    }
}

fn rwa_3() -> Benchmark {
    let boxes = Boxes::new(3, 6.0, 5.0, 1.2, 0.3);
    let mut config = boxes
        .rws_config(3, CertificateType::Rws, 1000)
        .with_network(vec![16], vec![ActivationType::Square]);
    config.cegis_max_iters = 25;
    config.seed = 167;
    Benchmark {
        name: "rwa_3",
        summary: "Reach-while-stay certificate for a third-order LQR loop",
        config,
        system: Arc::new(Companion::third_order_lqr()),
    }
}

fn rar_1() -> Benchmark {
    let n = 2;
    let boxes = Boxes::new(n, 3.5, 3.0, 2.0, 0.1);
    let final_ = centred_box(n, 0.15);
    let mut config = boxes
        .rws_config(n, CertificateType::Rar, 500)
        .with_network(vec![6], vec![ActivationType::Softplus])
        .with_alt_network(vec![6], vec![ActivationType::Square])
        .with_domain(RegionKey::Final, final_.clone())
        .with_data(RegionKey::Lie, boxes.domain.clone(), 500)
        .with_data(RegionKey::Goal, boxes.goal.clone(), 500)
        .with_data(RegionKey::Final, final_.clone(), 500)
        .with_data(
            RegionKey::NotFinal,
            Set::set_minus(boxes.domain.clone(), final_),
            500,
        );
    config.symmetric_belt = false;
    config.cegis_max_iters = 100;
    config.seed = 167;
    Benchmark {
        name: "rar_1",
        summary: "Reach-and-remain certificate for a second-order LQR loop",
        config,
        system: Arc::new(Companion::second_order_lqr()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_resolvable() {
        let all: Vec<_> = names().collect();
        let mut sorted = all.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), all.len());
        for name in all {
            let bench = find(name).expect("listed name resolves");
            assert_eq!(bench.name, name);
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(find("no_such_benchmark").is_none());
    }

    #[test]
    fn controlled_entries_match_their_control_dimension() {
        for bench in catalogue() {
            let m = bench.system.control_dim();
            assert_eq!(
                bench.config.ctrl_layers.last().copied().unwrap_or(0),
                m,
                "{}",
                bench.name
            );
        }
    }
}
