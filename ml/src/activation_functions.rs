//! This module provides the activation functions of the autoencoder,
//! namely Relu for the hidden layers and Sigmoid for the reconstruction.
//!
//! All activation functions are exposed as a layer as well as a free function.
//! The layers also know their derivative, which the backward pass needs.
use ndarray::*;

use crate::{Batch, ImagePrecision};

/// Relu implementation
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

/// Logistic sigmoid, maps the reconstruction into the pixel range [0, 1]
pub fn sigmoid<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| 1. / (1. + (-x).exp()))
}

/// Relu implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReluLayer {}

impl ReluLayer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn activate(&self, x: &Batch) -> Batch {
        relu(x)
    }

    /// The gradient only flows where the input was positive.
    pub fn backward(&self, input: &Batch, grad_output: &Batch) -> Batch {
        let mut grad = grad_output.clone();
        Zip::from(&mut grad).and(input).for_each(|g, &x| {
            if x <= 0. {
                *g = 0.
            }
        });
        grad
    }
}

/// Sigmoid implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SigmoidLayer {}

impl SigmoidLayer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn activate(&self, x: &Batch) -> Batch {
        sigmoid(x)
    }

    /// Uses the activation instead of the input: s'(x) = s(x) * (1 - s(x))
    pub fn backward(&self, output: &Batch, grad_output: &Batch) -> Batch {
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(output)
            .for_each(|g, &s| *g *= s * (1. - s));
        grad
    }
}
