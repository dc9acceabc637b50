//! Fully connected networks used for certificates and controllers.
//!
//! Training needs three derivatives: parameter gradients of the output,
//! of its directional derivative along the dynamics, and of the output at
//! a second point (discrete time). [`Mlp::forward_tangent`] carries the
//! directional derivative alongside the values and
//! [`Mlp::backward_tangent`] pulls adjoints of both back to the weights.

use certa_smt::terms::SmtTerm;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CegisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    Linear,
    Square,
    /// `z + z^2`
    Poly2,
    /// `z + z^2 + z^3`
    Poly3,
    Tanh,
    Sigmoid,
    Softplus,
}

impl ActivationType {
    pub fn is_polynomial(self) -> bool {
        matches!(
            self,
            ActivationType::Linear
                | ActivationType::Square
                | ActivationType::Poly2
                | ActivationType::Poly3
        )
    }

    pub fn apply(self, z: f64) -> f64 {
        match self {
            ActivationType::Linear => z,
            ActivationType::Square => z * z,
            ActivationType::Poly2 => z + z * z,
            ActivationType::Poly3 => z + z * z + z * z * z,
            ActivationType::Tanh => z.tanh(),
            ActivationType::Sigmoid => sigmoid(z),
            ActivationType::Softplus => z.max(0.0) + (-z.abs()).exp().ln_1p(),
        }
    }

    pub fn derivative(self, z: f64) -> f64 {
        match self {
            ActivationType::Linear => 1.0,
            ActivationType::Square => 2.0 * z,
            ActivationType::Poly2 => 1.0 + 2.0 * z,
            ActivationType::Poly3 => 1.0 + 2.0 * z + 3.0 * z * z,
            ActivationType::Tanh => 1.0 - z.tanh().powi(2),
            ActivationType::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            ActivationType::Softplus => sigmoid(z),
        }
    }

    pub fn second_derivative(self, z: f64) -> f64 {
        match self {
            ActivationType::Linear => 0.0,
            ActivationType::Square | ActivationType::Poly2 => 2.0,
            ActivationType::Poly3 => 2.0 + 6.0 * z,
            ActivationType::Tanh => {
                let t = z.tanh();
                -2.0 * t * (1.0 - t * t)
            }
            ActivationType::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s) * (1.0 - 2.0 * s)
            }
            ActivationType::Softplus => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
        }
    }

    pub fn symbolic(self, z: SmtTerm) -> SmtTerm {
        match self {
            ActivationType::Linear => z,
            ActivationType::Square => z.powi(2),
            ActivationType::Poly2 => z.clone() + z.powi(2),
            ActivationType::Poly3 => SmtTerm::sum([z.clone(), z.clone().powi(2), z.powi(3)]),
            ActivationType::Tanh => z.tanh(),
            ActivationType::Sigmoid => z.sigmoid(),
            ActivationType::Softplus => (SmtTerm::one() + z.exp()).log(),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `a = act(W x + b)`, with `W` stored as `out × in`.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub weight: Array2<f64>,
    pub bias: Option<Array1<f64>>,
    pub activation: ActivationType,
}

impl Layer {
    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    fn param_count(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, Array1::len)
    }
}

/// Serializable copy of a layer's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub weight: Vec<Vec<f64>>,
    pub bias: Option<Vec<f64>>,
    pub activation: ActivationType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    layers: Vec<Layer>,
}

/// Per-layer values kept for the backward pass.
#[derive(Debug, Clone)]
pub(crate) struct Forward {
    inputs: Vec<Array2<f64>>,
    pre: Vec<Array2<f64>>,
    pub(crate) output: Array2<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Tangent {
    inputs: Vec<Array2<f64>>,
    input_dots: Vec<Array2<f64>>,
    pre: Vec<Array2<f64>>,
    pre_dots: Vec<Array2<f64>>,
    pub(crate) output: Array2<f64>,
    pub(crate) output_dot: Array2<f64>,
}

/// Parameter gradients, laid out like the network.
#[derive(Debug, Clone)]
pub(crate) struct Gradients {
    layers: Vec<(Array2<f64>, Option<Array1<f64>>)>,
}

impl Gradients {
    pub(crate) fn flatten_into(&self, out: &mut Vec<f64>) {
        for (w, b) in &self.layers {
            out.extend(w.iter());
            if let Some(b) = b {
                out.extend(b.iter());
            }
        }
    }
}

impl Mlp {
    /// Hidden layers with the given widths and activations followed by a
    /// linear output layer, initialised uniformly in `±1/sqrt(fan_in)`.
    /// `bias` applies to every layer.
    pub fn new<R: Rng + ?Sized>(
        input: usize,
        hidden: &[usize],
        activations: &[ActivationType],
        output: usize,
        bias: bool,
        rng: &mut R,
    ) -> Result<Self, CegisError> {
        if hidden.len() != activations.len() {
            return Err(CegisError::Dimension(format!(
                "{} hidden layers but {} activations",
                hidden.len(),
                activations.len()
            )));
        }
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input;
        let shapes = hidden
            .iter()
            .zip(activations)
            .map(|(w, a)| (*w, *a))
            .chain(std::iter::once((output, ActivationType::Linear)));
        for (width, activation) in shapes {
            let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
            let mut draw = || bound * (2.0 * rng.random::<f64>() - 1.0);
            let weight = Array2::from_shape_simple_fn((width, fan_in), &mut draw);
            let offsets = bias.then(|| Array1::from_shape_simple_fn(width, &mut draw));
            layers.push(Layer {
                weight,
                bias: offsets,
                activation,
            });
            fan_in = width;
        }
        Self::from_layers(layers)
    }

    pub fn from_layers(layers: Vec<Layer>) -> Result<Self, CegisError> {
        if layers.is_empty() {
            return Err(CegisError::Dimension("network needs at least one layer".into()));
        }
        for (k, pair) in layers.windows(2).enumerate() {
            if pair[0].output_dim() != pair[1].input_dim() {
                return Err(CegisError::Dimension(format!(
                    "layer {k} outputs {} values but layer {} takes {}",
                    pair[0].output_dim(),
                    k + 1,
                    pair[1].input_dim()
                )));
            }
        }
        for (k, layer) in layers.iter().enumerate() {
            if let Some(b) = &layer.bias {
                if b.len() != layer.output_dim() {
                    return Err(CegisError::Dimension(format!(
                        "layer {k} bias has length {} but {} outputs",
                        b.len(),
                        layer.output_dim()
                    )));
                }
            }
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, Layer::input_dim)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, Layer::output_dim)
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Evaluate on a batch, one point per row.
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut a = x.clone();
        for layer in &self.layers {
            let z = affine(layer, &a);
            a = z.mapv(|v| layer.activation.apply(v));
        }
        a
    }

    pub fn forward_point(&self, x: &[f64]) -> Vec<f64> {
        let batch = Array2::from_shape_vec((1, x.len()), x.to_vec())
            .unwrap_or_else(|_| Array2::zeros((1, x.len())));
        self.forward(&batch).row(0).to_vec()
    }

    pub(crate) fn forward_cached(&self, x: &Array2<f64>) -> Forward {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre = Vec::with_capacity(self.layers.len());
        let mut a = x.clone();
        for layer in &self.layers {
            let z = affine(layer, &a);
            let next = z.mapv(|v| layer.activation.apply(v));
            inputs.push(a);
            pre.push(z);
            a = next;
        }
        Forward {
            inputs,
            pre,
            output: a,
        }
    }

    /// Accumulate `d(out_bar · output)/dθ` into `grads`; returns the input adjoint.
    pub(crate) fn backward(
        &self,
        fwd: &Forward,
        out_bar: &Array2<f64>,
        grads: &mut Gradients,
    ) -> Array2<f64> {
        let mut a_bar = out_bar.clone();
        for (k, layer) in self.layers.iter().enumerate().rev() {
            let act = layer.activation;
            let z_bar = &a_bar * &fwd.pre[k].mapv(|z| act.derivative(z));
            let (gw, gb) = &mut grads.layers[k];
            *gw += &z_bar.t().dot(&fwd.inputs[k]);
            if let Some(gb) = gb {
                *gb += &z_bar.sum_axis(Axis(0));
            }
            a_bar = z_bar.dot(&layer.weight);
        }
        a_bar
    }

    /// Values and directional derivatives along `dx`, row by row.
    pub(crate) fn forward_tangent(&self, x: &Array2<f64>, dx: &Array2<f64>) -> Tangent {
        let n = self.layers.len();
        let mut cache = Tangent {
            inputs: Vec::with_capacity(n),
            input_dots: Vec::with_capacity(n),
            pre: Vec::with_capacity(n),
            pre_dots: Vec::with_capacity(n),
            output: Array2::zeros((0, 0)),
            output_dot: Array2::zeros((0, 0)),
        };
        let mut a = x.clone();
        let mut a_dot = dx.clone();
        for layer in &self.layers {
            let act = layer.activation;
            let z = affine(layer, &a);
            let z_dot = a_dot.dot(&layer.weight.t());
            let next = z.mapv(|v| act.apply(v));
            let next_dot = &z.mapv(|v| act.derivative(v)) * &z_dot;
            cache.inputs.push(a);
            cache.input_dots.push(a_dot);
            cache.pre.push(z);
            cache.pre_dots.push(z_dot);
            a = next;
            a_dot = next_dot;
        }
        cache.output = a;
        cache.output_dot = a_dot;
        cache
    }

    /// Pull adjoints of the output and its tangent back to the weights;
    /// returns the adjoint of the tangent direction `dx`.
    pub(crate) fn backward_tangent(
        &self,
        tan: &Tangent,
        out_bar: &Array2<f64>,
        out_dot_bar: &Array2<f64>,
        grads: &mut Gradients,
    ) -> Array2<f64> {
        let mut a_bar = out_bar.clone();
        let mut a_dot_bar = out_dot_bar.clone();
        for (k, layer) in self.layers.iter().enumerate().rev() {
            let act = layer.activation;
            let d1 = tan.pre[k].mapv(|z| act.derivative(z));
            let d2 = tan.pre[k].mapv(|z| act.second_derivative(z));
            let curvature = &(&a_dot_bar * &d2) * &tan.pre_dots[k];
            let z_bar = &(&a_bar * &d1) + &curvature;
            let z_dot_bar = &a_dot_bar * &d1;
            let (gw, gb) = &mut grads.layers[k];
            *gw += &z_bar.t().dot(&tan.inputs[k]);
            *gw += &z_dot_bar.t().dot(&tan.input_dots[k]);
            if let Some(gb) = gb {
                *gb += &z_bar.sum_axis(Axis(0));
            }
            a_bar = z_bar.dot(&layer.weight);
            a_dot_bar = z_dot_bar.dot(&layer.weight);
        }
        a_dot_bar
    }

    pub(crate) fn zero_grads(&self) -> Gradients {
        Gradients {
            layers: self
                .layers
                .iter()
                .map(|l| {
                    (
                        Array2::zeros(l.weight.raw_dim()),
                        l.bias.as_ref().map(|b| Array1::zeros(b.len())),
                    )
                })
                .collect(),
        }
    }

    /// All parameters, layer by layer, weights row-major then bias.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            out.extend(layer.weight.iter());
            if let Some(b) = &layer.bias {
                out.extend(b.iter());
            }
        }
        out
    }

    /// Inverse of [`Mlp::flatten`]; consumes `param_count()` values from the front of `flat`.
    pub fn assign(&mut self, flat: &[f64]) -> Result<(), CegisError> {
        if flat.len() != self.param_count() {
            return Err(CegisError::Dimension(format!(
                "expected {} parameters, got {}",
                self.param_count(),
                flat.len()
            )));
        }
        let mut values = flat.iter().copied();
        for layer in &mut self.layers {
            for (w, v) in layer.weight.iter_mut().zip(values.by_ref()) {
                *w = v;
            }
            if let Some(b) = &mut layer.bias {
                for (w, v) in b.iter_mut().zip(values.by_ref()) {
                    *w = v;
                }
            }
        }
        Ok(())
    }

    pub fn map_params(&mut self, f: impl Fn(f64) -> f64) {
        for layer in &mut self.layers {
            layer.weight.mapv_inplace(&f);
            if let Some(b) = &mut layer.bias {
                b.mapv_inplace(&f);
            }
        }
    }

    pub fn all_finite(&self) -> bool {
        self.layers.iter().all(|l| {
            l.weight.iter().all(|w| w.is_finite())
                && l.bias.as_ref().map_or(true, |b| b.iter().all(|w| w.is_finite()))
        })
    }

    pub fn weights(&self) -> Vec<LayerWeights> {
        self.layers
            .iter()
            .map(|l| LayerWeights {
                weight: l.weight.rows().into_iter().map(|r| r.to_vec()).collect(),
                bias: l.bias.as_ref().map(|b| b.to_vec()),
                activation: l.activation,
            })
            .collect()
    }
}

fn affine(layer: &Layer, a: &Array2<f64>) -> Array2<f64> {
    let mut z = a.dot(&layer.weight.t());
    if let Some(b) = &layer.bias {
        z += b;
    }
    z
}
