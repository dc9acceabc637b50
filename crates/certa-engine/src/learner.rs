//! Gradient descent on certificate losses.
//!
//! The learner evaluates the certificate's probes on the current data,
//! asks the certificate for the loss and its derivatives with respect to
//! the probe outputs, and pulls those back through the certificate network,
//! the alternate network and the controller. The controller enters through
//! the dynamics, so its gradient uses `∂f/∂u` from the system.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::candidate::Candidate;
use crate::certificate::{Certificate, LossTerms, NetRole, Probe, ProbeGrad, ProbeValues};
use crate::config::{LearnerConfig, RegionKey, TimeDomain};
use crate::data::Dataset;
use crate::error::CegisError;
use crate::network::{Forward, Gradients, Mlp, Tangent};
use crate::system::System;

/// Adam with the usual defaults.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: f64, params: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: vec![0.0; params],
            v: vec![0.0; params],
            t: 0,
        }
    }

    pub fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        self.t = self.t.saturating_add(1);
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        for (i, (p, g)) in params.iter_mut().zip(grad).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Result of one [`Learner::fit`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub steps: usize,
    /// Loss of the parameters kept at the end of training.
    pub final_loss: f64,
    pub terms: Vec<(&'static str, f64)>,
    /// `final_loss <= target_loss`. A miss is not an error.
    pub converged: bool,
}

enum TraceKind {
    Value(Forward),
    Continuous(Tangent),
    Discrete { here: Forward, next: Forward },
}

struct ProbeTrace {
    probe: Probe,
    points: Array2<f64>,
    kind: TraceKind,
    /// Controller pass and its outputs for flow probes.
    control: Option<(Forward, Array2<f64>)>,
}

struct CandidateGrads {
    certificate: Gradients,
    alt: Option<Gradients>,
    controller: Option<Gradients>,
}

impl CandidateGrads {
    fn new(candidate: &Candidate) -> Self {
        Self {
            certificate: candidate.certificate.zero_grads(),
            alt: candidate.alt.as_ref().map(Mlp::zero_grads),
            controller: candidate.controller.as_ref().map(Mlp::zero_grads),
        }
    }

    fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.certificate.flatten_into(&mut out);
        if let Some(g) = &self.alt {
            g.flatten_into(&mut out);
        }
        if let Some(g) = &self.controller {
            g.flatten_into(&mut out);
        }
        out
    }
}

pub struct Learner {
    config: LearnerConfig,
    time_domain: TimeDomain,
    anchored: bool,
    optimizer: Option<Adam>,
}

impl Learner {
    pub fn new(config: LearnerConfig, time_domain: TimeDomain, anchored: bool) -> Self {
        Self {
            config,
            time_domain,
            anchored,
            optimizer: None,
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Loss of `candidate` on `data`, without gradients.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        certificate: &Certificate,
        system: &dyn System,
        data: &Dataset,
    ) -> Result<LossTerms, CegisError> {
        let (values, _) = self.forward(candidate, certificate, system, data)?;
        certificate.loss(&values)
    }

    /// Train in place, starting from the current weights.
    ///
    /// Optimizer state carries over between calls so successive CEGIS
    /// rounds continue from where the last one stopped. The best
    /// parameters seen are restored before returning.
    pub fn fit(
        &mut self,
        candidate: &mut Candidate,
        certificate: &Certificate,
        system: &dyn System,
        data: &Dataset,
    ) -> Result<FitOutcome, CegisError> {
        let n_params = candidate.param_count();
        let mut optimizer = match self.optimizer.take() {
            Some(opt) if opt.m.len() == n_params => opt,
            _ => Adam::new(self.config.learning_rate, n_params),
        };
        let mut params = candidate.flatten();
        let mut best = (f64::INFINITY, params.clone(), Vec::new());
        let mut since_best = 0;
        let mut steps = 0;

        while steps < self.config.max_steps {
            let (loss, grad) = self.loss_and_gradient(candidate, certificate, system, data)?;
            if !loss.total.is_finite() {
                debug!(step = steps, "loss is not finite, stopping");
                break;
            }
            if loss.total < best.0 {
                best = (loss.total, params.clone(), loss.terms.clone());
                since_best = 0;
            } else {
                since_best += 1;
            }
            if loss.total <= self.config.target_loss {
                break;
            }
            if since_best >= self.config.patience {
                debug!(step = steps, best = best.0, "no improvement, stopping early");
                break;
            }
            optimizer.step(&mut params, &grad);
            candidate.assign(&params)?;
            steps += 1;
            if steps % 100 == 0 {
                debug!(step = steps, loss = loss.total, "learner progress");
            }
        }
        self.optimizer = Some(optimizer);

        let (mut final_loss, best_params, mut terms) = best;
        if final_loss.is_finite() {
            candidate.assign(&best_params)?;
        } else {
            let loss = self.evaluate(candidate, certificate, system, data)?;
            final_loss = loss.total;
            terms = loss.terms;
        }
        Ok(FitOutcome {
            steps,
            final_loss,
            terms,
            converged: final_loss <= self.config.target_loss,
        })
    }

    fn loss_and_gradient(
        &self,
        candidate: &Candidate,
        certificate: &Certificate,
        system: &dyn System,
        data: &Dataset,
    ) -> Result<(LossTerms, Vec<f64>), CegisError> {
        let (values, traces) = self.forward(candidate, certificate, system, data)?;
        let loss = certificate.loss(&values)?;
        let mut grads = CandidateGrads::new(candidate);
        let mut anchor_bar = 0.0;
        for (trace, grad) in traces.iter().zip(&loss.grads) {
            self.backward(candidate, system, trace, grad, &mut grads)?;
            if self.anchored && trace.probe.role == NetRole::Primary {
                anchor_bar += grad.value.sum();
            }
        }
        if self.anchored && anchor_bar != 0.0 {
            let origin = Array2::zeros((1, candidate.certificate.input_dim()));
            let fwd = candidate.certificate.forward_cached(&origin);
            let bar = Array2::from_elem((1, 1), -anchor_bar);
            candidate
                .certificate
                .backward(&fwd, &bar, &mut grads.certificate);
        }
        Ok((loss, grads.flatten()))
    }

    fn forward(
        &self,
        candidate: &Candidate,
        certificate: &Certificate,
        system: &dyn System,
        data: &Dataset,
    ) -> Result<(Vec<ProbeValues>, Vec<ProbeTrace>), CegisError> {
        let offset = if self.anchored {
            candidate
                .certificate
                .forward_point(&vec![0.0; candidate.certificate.input_dim()])
                .first()
                .copied()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let probes = certificate.probes();
        let mut values = Vec::with_capacity(probes.len());
        let mut traces = Vec::with_capacity(probes.len());
        for probe in probes {
            let (mut value, trace) = self.run_probe(candidate, system, data, probe)?;
            if probe.role == NetRole::Primary {
                value.value -= offset;
            }
            values.push(value);
            traces.push(trace);
        }
        Ok((values, traces))
    }

    fn run_probe(
        &self,
        candidate: &Candidate,
        system: &dyn System,
        data: &Dataset,
        probe: Probe,
    ) -> Result<(ProbeValues, ProbeTrace), CegisError> {
        let net = network(candidate, probe.role)?;
        let points = data.points(probe.region);
        let n = points.nrows();
        let sq_norm = points.map_axis(Axis(1), |row| row.dot(&row));

        if !probe.flow {
            let fwd = net.forward_cached(&points);
            let values = ProbeValues {
                value: fwd.output.column(0).to_owned(),
                flow: Array1::zeros(n),
                sq_norm,
            };
            let trace = ProbeTrace {
                probe,
                points,
                kind: TraceKind::Value(fwd),
                control: None,
            };
            return Ok((values, trace));
        }

        let control = candidate.controller.as_ref().map(|ctrl| {
            let fwd = ctrl.forward_cached(&points);
            let u = fwd.output.clone();
            (fwd, u)
        });
        let u = control
            .as_ref()
            .map(|(_, u)| u.clone())
            .unwrap_or_else(|| Array2::zeros((n, 0)));
        let step = dynamics(system, &points, &u, probe.region)?;

        let (values, kind) = match self.time_domain {
            TimeDomain::Continuous => {
                let tangent = net.forward_tangent(&points, &step);
                let values = ProbeValues {
                    value: tangent.output.column(0).to_owned(),
                    flow: tangent.output_dot.column(0).to_owned(),
                    sq_norm,
                };
                (values, TraceKind::Continuous(tangent))
            }
            TimeDomain::Discrete => {
                let here = net.forward_cached(&points);
                let next = net.forward_cached(&step);
                let value = here.output.column(0).to_owned();
                let flow = &next.output.column(0) - &value;
                let values = ProbeValues {
                    value,
                    flow,
                    sq_norm,
                };
                (values, TraceKind::Discrete { here, next })
            }
        };
        let trace = ProbeTrace {
            probe,
            points,
            kind,
            control,
        };
        Ok((values, trace))
    }

    fn backward(
        &self,
        candidate: &Candidate,
        system: &dyn System,
        trace: &ProbeTrace,
        grad: &ProbeGrad,
        grads: &mut CandidateGrads,
    ) -> Result<(), CegisError> {
        let net = network(candidate, trace.probe.role)?;
        let target = match trace.probe.role {
            NetRole::Primary => &mut grads.certificate,
            NetRole::Alt => grads
                .alt
                .as_mut()
                .ok_or_else(|| CegisError::Dimension("alternate gradients missing".into()))?,
        };
        let column = |a: &Array1<f64>| a.clone().insert_axis(Axis(1));
        let state_bar = match &trace.kind {
            TraceKind::Value(fwd) => {
                net.backward(fwd, &column(&grad.value), target);
                None
            }
            TraceKind::Continuous(tangent) => Some(net.backward_tangent(
                tangent,
                &column(&grad.value),
                &column(&grad.flow),
                target,
            )),
            TraceKind::Discrete { here, next } => {
                net.backward(here, &column(&(&grad.value - &grad.flow)), target);
                Some(net.backward(next, &column(&grad.flow), target))
            }
        };

        if let (Some(state_bar), Some((ctrl_fwd, u)), Some(ctrl)) =
            (state_bar, &trace.control, &candidate.controller)
        {
            let mut u_bar = Array2::zeros(u.raw_dim());
            for (i, row_bar) in state_bar.rows().into_iter().enumerate() {
                if row_bar.iter().all(|g| *g == 0.0) {
                    continue;
                }
                let x = trace.points.row(i).to_vec();
                let jac = system.control_jacobian(&x, &u.row(i).to_vec());
                u_bar.row_mut(i).assign(&jac.t().dot(&row_bar));
            }
            if let Some(ctrl_grads) = grads.controller.as_mut() {
                ctrl.backward(ctrl_fwd, &u_bar, ctrl_grads);
            }
        }
        Ok(())
    }
}

fn network(candidate: &Candidate, role: NetRole) -> Result<&Mlp, CegisError> {
    match role {
        NetRole::Primary => Ok(&candidate.certificate),
        NetRole::Alt => candidate.alt.as_ref().ok_or_else(|| {
            CegisError::ConfigurationInvalid("certificate needs an alternate network".into())
        }),
    }
}

/// `f(x_i, u_i)` for every row.
fn dynamics(
    system: &dyn System,
    points: &Array2<f64>,
    u: &Array2<f64>,
    region: RegionKey,
) -> Result<Array2<f64>, CegisError> {
    let (n, dim) = points.dim();
    let mut out = Array2::zeros((n, dim));
    for i in 0..n {
        let f = system.eval(&points.row(i).to_vec(), &u.row(i).to_vec());
        if f.len() != dim {
            return Err(CegisError::Dimension(format!(
                "system `{}` returned {} values for a {dim}-dimensional `{region}` sample",
                system.name(),
                f.len()
            )));
        }
        out.row_mut(i).assign(&Array1::from(f));
    }
    Ok(out)
}
