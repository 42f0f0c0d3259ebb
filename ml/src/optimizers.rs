//! Gradient based optimizers updating the convolution parameters in place.
//!
//! Parameters are identified by their position in the list handed to `step`, so the
//! caller has to pass the layers in the same order on every call.
use crate::{
    convolutions::{ConvGradients, ConvolutionLayer},
    ConvKernel, WeightPrecision,
};
use ndarray::*;
use serde_derive::{Deserialize, Serialize};

pub trait Optimizer {
    /// Applies one update to every (layer, gradient) pair.
    fn step(&mut self, params: Vec<(&mut ConvolutionLayer, &ConvGradients)>);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Serializable choice of the optimizer, part of the training configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub fn build(&self, learning_rate: f64) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
            OptimizerKind::Adam => Box::new(Adam::new(ParamsAdam {
                lr: learning_rate,
                ..Default::default()
            })),
        }
    }
}

/// Plain stochastic gradient descent
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: Vec<(&mut ConvolutionLayer, &ConvGradients)>) {
        let lr = self.learning_rate as WeightPrecision;
        for (layer, grads) in params {
            let (kernel, bias) = layer.parameters_mut();
            kernel.scaled_add(-lr, &grads.kernel);
            bias.scaled_add(-lr, &grads.bias);
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// First and second moment of one convolution layer
#[derive(Debug, Clone)]
struct AdamState {
    m_kernel: ConvKernel,
    v_kernel: ConvKernel,
    m_bias: Array1<WeightPrecision>,
    v_bias: Array1<WeightPrecision>,
}

impl AdamState {
    fn zeros_like(layer: &ConvolutionLayer) -> Self {
        Self {
            m_kernel: Array::zeros(layer.kernel().raw_dim()),
            v_kernel: Array::zeros(layer.kernel().raw_dim()),
            m_bias: Array::zeros(layer.bias().raw_dim()),
            v_bias: Array::zeros(layer.bias().raw_dim()),
        }
    }
}

/// Adam with bias corrected moment estimates, <https://arxiv.org/abs/1412.6980>
#[derive(Debug, Clone)]
pub struct Adam {
    params: ParamsAdam,
    step_t: usize,
    states: Vec<AdamState>,
}

impl Adam {
    pub fn new(params: ParamsAdam) -> Self {
        Self {
            params,
            step_t: 0,
            states: Vec::new(),
        }
    }

    pub fn params(&self) -> &ParamsAdam {
        &self.params
    }
}

fn adam_update<D: Dimension>(
    theta: &mut Array<WeightPrecision, D>,
    m: &mut Array<WeightPrecision, D>,
    v: &mut Array<WeightPrecision, D>,
    grad: &Array<WeightPrecision, D>,
    params: &ParamsAdam,
    scale_m: f64,
    scale_v: f64,
) {
    let beta1 = params.beta1 as WeightPrecision;
    let beta2 = params.beta2 as WeightPrecision;
    let lr = params.lr as WeightPrecision;
    let eps = params.eps as WeightPrecision;
    let (scale_m, scale_v) = (scale_m as WeightPrecision, scale_v as WeightPrecision);
    Zip::from(theta)
        .and(m)
        .and(v)
        .and(grad)
        .for_each(|theta, m, v, &g| {
            *m = *m * beta1 + g * (1.0 - beta1);
            *v = *v * beta2 + g * g * (1.0 - beta2);
            let m_hat = *m * scale_m;
            let v_hat = *v * scale_v;
            *theta -= lr * m_hat / (v_hat.sqrt() + eps);
        });
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<(&mut ConvolutionLayer, &ConvGradients)>) {
        self.step_t += 1;
        let scale_m = 1f64 / (1f64 - self.params.beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - self.params.beta2.powi(self.step_t as i32));

        for (slot, (layer, grads)) in params.into_iter().enumerate() {
            if self.states.len() <= slot {
                self.states.push(AdamState::zeros_like(layer));
            }
            let state = &mut self.states[slot];
            let (kernel, bias) = layer.parameters_mut();
            adam_update(
                kernel,
                &mut state.m_kernel,
                &mut state.v_kernel,
                &grads.kernel,
                &self.params,
                scale_m,
                scale_v,
            );
            adam_update(
                bias,
                &mut state.m_bias,
                &mut state.v_bias,
                &grads.bias,
                &self.params,
                scale_m,
                scale_v,
            );
        }
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }
}
