//! Exact symbolic rendering of candidate networks.
//!
//! Translation is a pure function of the weights and the rounding setting.
//! Every weight becomes an exact rational, either rounded to a fixed number
//! of decimals or taken as the shortest decimal that round-trips the
//! `f64`. [`Translator::project`] snaps the numeric weights onto those same
//! rationals, so the projected network and the verified formula describe
//! one function.

use std::collections::HashMap;

use certa_smt::terms::{decimal_rational, rounded_rational, SmtTerm};
use num::rational::BigRational;
use num::ToPrimitive;

use crate::candidate::Candidate;
use crate::config::{CegisConfig, TimeDomain};
use crate::error::CegisError;
use crate::network::Mlp;
use crate::system::System;

/// Symbolic snapshot of a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSymbols {
    pub names: Vec<String>,
    pub vars: Vec<SmtTerm>,
    pub certificate: SmtTerm,
    /// `∇V · f` in continuous time, `V(f(x)) - V(x)` in discrete time.
    pub flow: SmtTerm,
    pub certificate_alt: Option<SmtTerm>,
    pub flow_alt: Option<SmtTerm>,
    pub controller: Option<Vec<SmtTerm>>,
}

impl CandidateSymbols {
    #[cfg(test)]
    pub(crate) fn for_tests(vars: Vec<SmtTerm>, certificate: SmtTerm, flow: SmtTerm) -> Self {
        Self {
            names: (0..vars.len()).map(|i| format!("x{i}")).collect(),
            vars,
            certificate,
            flow,
            certificate_alt: None,
            flow_alt: None,
            controller: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_alt(mut self, certificate_alt: SmtTerm, flow_alt: SmtTerm) -> Self {
        self.certificate_alt = Some(certificate_alt);
        self.flow_alt = Some(flow_alt);
        self
    }
}

/// State variable names `x0, x1, ...` and their terms.
pub fn state_vars(n: usize) -> (Vec<String>, Vec<SmtTerm>) {
    let names: Vec<String> = (0..n).map(|i| format!("x{i}")).collect();
    let vars = names.iter().map(SmtTerm::var).collect();
    (names, vars)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translator {
    rounding: Option<u32>,
    time_domain: TimeDomain,
    anchored: bool,
}

impl Translator {
    pub fn new(rounding: Option<u32>, time_domain: TimeDomain, anchored: bool) -> Self {
        Self {
            rounding,
            time_domain,
            anchored,
        }
    }

    pub fn from_config(config: &CegisConfig, anchored: bool) -> Self {
        Self::new(config.rounding, config.time_domain, anchored)
    }

    pub fn rational(&self, weight: f64) -> Result<BigRational, CegisError> {
        let exact = match self.rounding {
            Some(digits) => rounded_rational(weight, digits),
            None => decimal_rational(weight),
        };
        exact.ok_or_else(|| CegisError::NonFinite(format!("weight {weight}")))
    }

    pub fn round_weight(&self, weight: f64) -> Result<f64, CegisError> {
        self.rational(weight)?
            .to_f64()
            .ok_or_else(|| CegisError::NonFinite(format!("rounded weight {weight}")))
    }

    /// Snap every parameter onto the rational used for translation.
    pub fn project(&self, candidate: &mut Candidate) -> Result<(), CegisError> {
        let rounded = candidate
            .flatten()
            .into_iter()
            .map(|w| self.round_weight(w))
            .collect::<Result<Vec<_>, _>>()?;
        candidate.assign(&rounded)
    }

    fn literal(&self, weight: f64) -> Result<SmtTerm, CegisError> {
        Ok(SmtTerm::real(self.rational(weight)?))
    }

    /// Symbolic outputs of `net` applied to `inputs`.
    pub fn network(&self, net: &Mlp, inputs: &[SmtTerm]) -> Result<Vec<SmtTerm>, CegisError> {
        if inputs.len() != net.input_dim() {
            return Err(CegisError::Dimension(format!(
                "network takes {} inputs, got {}",
                net.input_dim(),
                inputs.len()
            )));
        }
        let mut current = inputs.to_vec();
        for layer in net.layers() {
            let mut next = Vec::with_capacity(layer.output_dim());
            for (i, row) in layer.weight.rows().into_iter().enumerate() {
                let mut summands = Vec::with_capacity(row.len() + 1);
                for (w, a) in row.iter().zip(&current) {
                    summands.push(self.literal(*w)? * a.clone());
                }
                if let Some(bias) = &layer.bias {
                    summands.push(self.literal(bias[i])?);
                }
                next.push(layer.activation.symbolic(SmtTerm::sum(summands)));
            }
            current = next;
        }
        Ok(current)
    }

    fn scalar_network(&self, net: &Mlp, inputs: &[SmtTerm]) -> Result<SmtTerm, CegisError> {
        self.network(net, inputs)?
            .into_iter()
            .next()
            .ok_or_else(|| CegisError::Dimension("certificate network has no output".into()))
    }

    fn flow(
        &self,
        v: &SmtTerm,
        names: &[String],
        dynamics: &[SmtTerm],
    ) -> Result<SmtTerm, CegisError> {
        match self.time_domain {
            TimeDomain::Continuous => {
                let gradient = v.gradient(names)?;
                Ok(SmtTerm::sum(
                    gradient
                        .into_iter()
                        .zip(dynamics)
                        .map(|(g, f)| g * f.clone()),
                ))
            }
            TimeDomain::Discrete => {
                let step: HashMap<String, SmtTerm> =
                    names.iter().cloned().zip(dynamics.iter().cloned()).collect();
                Ok(v.substitute(&step) - v.clone())
            }
        }
    }

    pub fn translate(
        &self,
        candidate: &Candidate,
        system: &dyn System,
    ) -> Result<CandidateSymbols, CegisError> {
        let (names, vars) = state_vars(system.state_dim());
        let controller = candidate
            .controller
            .as_ref()
            .map(|net| self.network(net, &vars))
            .transpose()?;
        let dynamics = system.symbolic(&vars, controller.as_deref().unwrap_or(&[]));

        let mut certificate = self.scalar_network(&candidate.certificate, &vars)?;
        if self.anchored {
            let origin = vec![SmtTerm::zero(); vars.len()];
            let offset = self.scalar_network(&candidate.certificate, &origin)?;
            certificate = certificate - offset;
        }
        let flow = self.flow(&certificate, &names, &dynamics)?;

        let (certificate_alt, flow_alt) = match &candidate.alt {
            Some(net) => {
                let w = self.scalar_network(net, &vars)?;
                let w_flow = self.flow(&w, &names, &dynamics)?;
                (Some(w), Some(w_flow))
            }
            None => (None, None),
        };
        Ok(CandidateSymbols {
            names,
            vars,
            certificate,
            flow,
            certificate_alt,
            flow_alt,
            controller,
        })
    }
}
