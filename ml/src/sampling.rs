//! Spatial down- and upsampling by a factor of two. The encoder halves the
//! resolution with max pooling after every convolution, the decoder doubles it again
//! with nearest neighbour upsampling.
use crate::{Batch, ImagePrecision};
use ndarray::*;

/// 2x2 max pooling with stride 2. Odd trailing rows and columns are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaxPoolLayer {}

impl MaxPoolLayer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn output_shape(&self, input_shape: (usize, usize, usize)) -> (usize, usize, usize) {
        (input_shape.0, input_shape.1 / 2, input_shape.2 / 2)
    }

    pub fn forward(&self, input: &Batch) -> Batch {
        let (n, channels, height, width) = input.dim();
        Array::from_shape_fn((n, channels, height / 2, width / 2), |(b, c, y, x)| {
            input
                .slice(s![b, c, 2 * y..2 * y + 2, 2 * x..2 * x + 2])
                .fold(ImagePrecision::NEG_INFINITY, |m, &v| m.max(v))
        })
    }

    /// Routes every gradient to the first maximal element of its window,
    /// the remaining elements receive nothing.
    pub fn backward(&self, input: &Batch, grad_output: &Batch) -> Batch {
        let mut grad_input = Batch::zeros(input.raw_dim());
        for ((b, c, y, x), &g) in grad_output.indexed_iter() {
            let mut best = (2 * y, 2 * x);
            for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                let candidate = (2 * y + dy, 2 * x + dx);
                if input[[b, c, candidate.0, candidate.1]] > input[[b, c, best.0, best.1]] {
                    best = candidate;
                }
            }
            grad_input[[b, c, best.0, best.1]] += g;
        }
        grad_input
    }
}

/// Nearest neighbour upsampling by a factor of two.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpsampleLayer {}

impl UpsampleLayer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn output_shape(&self, input_shape: (usize, usize, usize)) -> (usize, usize, usize) {
        (input_shape.0, input_shape.1 * 2, input_shape.2 * 2)
    }

    pub fn forward(&self, input: &Batch) -> Batch {
        let (n, channels, height, width) = input.dim();
        Array::from_shape_fn((n, channels, height * 2, width * 2), |(b, c, y, x)| {
            input[[b, c, y / 2, x / 2]]
        })
    }

    /// Every input pixel was copied four times, so it collects the sum of four gradients.
    pub fn backward(&self, input: &Batch, grad_output: &Batch) -> Batch {
        Array::from_shape_fn(input.raw_dim(), |(b, c, y, x)| {
            grad_output
                .slice(s![b, c, 2 * y..2 * y + 2, 2 * x..2 * x + 2])
                .sum()
        })
    }
}
