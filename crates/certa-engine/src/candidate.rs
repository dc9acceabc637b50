//! The functions being synthesized.

use rand::Rng;
use serde::Serialize;

use crate::config::{CegisConfig, CertificateType};
use crate::error::CegisError;
use crate::network::{LayerWeights, Mlp};

/// Certificate network plus the optional alternate and controller networks.
///
/// Parameters are laid out for the optimizer as certificate, then
/// alternate, then controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub certificate: Mlp,
    pub alt: Option<Mlp>,
    pub controller: Option<Mlp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateWeights {
    pub certificate: Vec<LayerWeights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<Vec<LayerWeights>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<Vec<LayerWeights>>,
}

impl Candidate {
    /// Fresh random networks shaped by `config`.
    ///
    /// Lyapunov networks and controllers carry no bias so that the origin
    /// stays an equilibrium of the closed loop.
    pub fn init<R: Rng + ?Sized>(config: &CegisConfig, rng: &mut R) -> Result<Self, CegisError> {
        let n = config.n_vars;
        let bias = config.certificate != CertificateType::Lyapunov;
        let certificate = Mlp::new(
            n,
            &config.n_hidden_neurons,
            &config.activations,
            1,
            bias,
            rng,
        )?;
        let alt = if config.certificate.uses_alt_network() {
            Some(Mlp::new(
                n,
                &config.n_hidden_neurons_alt,
                &config.activations_alt,
                1,
                true,
                rng,
            )?)
        } else {
            None
        };
        let controller = match config.ctrl_layers.split_last() {
            Some((&outputs, hidden)) => Some(Mlp::new(
                n,
                hidden,
                &config.ctrl_activations,
                outputs,
                false,
                rng,
            )?),
            None => None,
        };
        Ok(Self {
            certificate,
            alt,
            controller,
        })
    }

    fn nets(&self) -> impl Iterator<Item = &Mlp> {
        std::iter::once(&self.certificate)
            .chain(self.alt.as_ref())
            .chain(self.controller.as_ref())
    }

    fn nets_mut(&mut self) -> impl Iterator<Item = &mut Mlp> {
        std::iter::once(&mut self.certificate)
            .chain(self.alt.as_mut())
            .chain(self.controller.as_mut())
    }

    pub fn param_count(&self) -> usize {
        self.nets().map(Mlp::param_count).sum()
    }

    pub fn flatten(&self) -> Vec<f64> {
        self.nets().flat_map(Mlp::flatten).collect()
    }

    pub fn assign(&mut self, flat: &[f64]) -> Result<(), CegisError> {
        if flat.len() != self.param_count() {
            return Err(CegisError::Dimension(format!(
                "candidate has {} parameters, got {}",
                self.param_count(),
                flat.len()
            )));
        }
        let mut rest = flat;
        for net in self.nets_mut() {
            let (head, tail) = rest.split_at(net.param_count());
            net.assign(head)?;
            rest = tail;
        }
        Ok(())
    }

    pub fn map_params(&mut self, f: impl Fn(f64) -> f64) {
        for net in self.nets_mut() {
            net.map_params(&f);
        }
    }

    pub fn all_finite(&self) -> bool {
        self.nets().all(Mlp::all_finite)
    }

    pub fn weights(&self) -> CandidateWeights {
        CandidateWeights {
            certificate: self.certificate.weights(),
            alt: self.alt.as_ref().map(Mlp::weights),
            controller: self.controller.as_ref().map(Mlp::weights),
        }
    }
}
