//! Convolutions with stride one and "same" zero padding, together with their backward pass.
//! Both directions are expressed as matrix products on im2col patches.
//!
//! More can be read here:
//! - <https://leonardoaraujosantos.gitbook.io/artificial-inteligence/machine_learning/deep_learning/convolution_layer/making_faster>
use crate::{Batch, ConvKernel, ImagePrecision, InternalDataRepresentation, WeightPrecision};
use ndarray::*;
use rand::Rng;

/// Rust implementation of a convolutional layer.
/// The weight matrix has the Pytorch layout
/// (output channels, input channels, kernel height, kernel width).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionLayer {
    /// Weight matrix of the kernel, always kept in standard layout
    kernel: ConvKernel,
    /// One bias per output channel
    bias: Array1<WeightPrecision>,
}

/// Parameter gradients of a convolution layer, summed over a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvGradients {
    pub kernel: ConvKernel,
    pub bias: Array1<WeightPrecision>,
}

impl ConvolutionLayer {
    /// Creates a new convolution layer from Pytorch layout weights.
    pub fn new(kernel: ConvKernel, bias: Array1<WeightPrecision>) -> ConvolutionLayer {
        let (output_channels, _, kernel_height, kernel_width) = kernel.dim();
        debug_assert_eq!(
            bias.len(),
            output_channels,
            "Bias needs exactly one entry per output channel"
        );
        debug_assert!(
            kernel_height % 2 == 1 && kernel_width % 2 == 1,
            "Same padding needs an odd kernel size"
        );
        let kernel = if kernel.is_standard_layout() {
            kernel
        } else {
            kernel.as_standard_layout().into_owned()
        };
        ConvolutionLayer { kernel, bias }
    }

    /// Glorot-uniform kernel and zero bias, the initialisation Keras uses for Conv2D.
    pub fn glorot<R: Rng>(
        input_channels: usize,
        output_channels: usize,
        kernel_size: usize,
        rng: &mut R,
    ) -> ConvolutionLayer {
        let receptive_field = kernel_size * kernel_size;
        let limit =
            (6.0 / ((input_channels + output_channels) * receptive_field) as WeightPrecision).sqrt();
        let kernel = Array::from_shape_fn(
            (output_channels, input_channels, kernel_size, kernel_size),
            |_| rng.gen_range(-limit..limit),
        );
        ConvolutionLayer::new(kernel, Array1::zeros(output_channels))
    }

    pub fn kernel(&self) -> &ConvKernel {
        &self.kernel
    }

    pub fn bias(&self) -> &Array1<WeightPrecision> {
        &self.bias
    }

    pub(crate) fn parameters_mut(&mut self) -> (&mut ConvKernel, &mut Array1<WeightPrecision>) {
        (&mut self.kernel, &mut self.bias)
    }

    pub fn output_channels(&self) -> usize {
        self.kernel.len_of(Axis(0))
    }

    pub fn input_channels(&self) -> usize {
        self.kernel.len_of(Axis(1))
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel.len_of(Axis(2)), self.kernel.len_of(Axis(3)))
    }

    pub fn num_parameters(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    pub fn is_finite(&self) -> bool {
        self.kernel.iter().chain(self.bias.iter()).all(|w| w.is_finite())
    }

    /// Same padding keeps height and width, only the channels change.
    pub fn output_shape(&self, input_shape: (usize, usize, usize)) -> (usize, usize, usize) {
        (self.output_channels(), input_shape.1, input_shape.2)
    }

    /// Convolves every image of the batch.
    pub fn forward(&self, input: &Batch) -> Batch {
        let (n, _, height, width) = input.dim();
        let kernel_matrix = self.kernel_matrix();
        let mut output = Batch::zeros((n, self.output_channels(), height, width));
        for (image, mut out) in input.outer_iter().zip(output.outer_iter_mut()) {
            out.assign(&self.convolve_image(&kernel_matrix, image));
        }
        output
    }

    /// Backward pass. Returns the gradient with respect to the input and the
    /// parameter gradients, summed over the batch.
    pub fn backward(&self, input: &Batch, grad_output: &Batch) -> (Batch, ConvGradients) {
        let (_, channels, height, width) = input.dim();
        let (kernel_height, kernel_width) = self.kernel_size();
        let filters = self.output_channels();
        let kernel_matrix = self.kernel_matrix();

        let mut grad_input = Batch::zeros(input.raw_dim());
        let mut grad_kernel: Array2<WeightPrecision> =
            Array::zeros((filters, channels * kernel_height * kernel_width));
        let mut grad_bias: Array1<WeightPrecision> = Array::zeros(filters);

        for ((image, grad), mut grad_in) in input
            .outer_iter()
            .zip(grad_output.outer_iter())
            .zip(grad_input.outer_iter_mut())
        {
            let cols = self.im2col(image);
            let grad_matrix: Array2<ImagePrecision> =
                Array::from_shape_vec((filters, height * width), grad.iter().copied().collect())
                    .expect("gradient has the shape of the layer output");

            grad_kernel += &grad_matrix.dot(&cols);
            grad_bias += &grad_matrix.sum_axis(Axis(1));

            let grad_cols = grad_matrix.t().dot(&kernel_matrix);
            grad_in.assign(&self.col2im(&grad_cols, channels, height, width));
        }

        let gradients = ConvGradients {
            kernel: grad_kernel
                .into_shape(self.kernel.raw_dim())
                .expect("kernel gradient has as many entries as the kernel"),
            bias: grad_bias,
        };
        (grad_input, gradients)
    }

    /// Kernel reshaped to (F, C*HH*WW)
    fn kernel_matrix(&self) -> ArrayView2<WeightPrecision> {
        let filters = self.output_channels();
        let row_len = self.kernel.len() / filters.max(1);
        self.kernel
            .view()
            .into_shape((filters, row_len))
            .expect("kernel is kept in standard layout")
    }

    fn padding(&self) -> (usize, usize) {
        let (kernel_height, kernel_width) = self.kernel_size();
        (kernel_height / 2, kernel_width / 2)
    }

    fn convolve_image(
        &self,
        kernel_matrix: &ArrayView2<WeightPrecision>,
        image: ArrayView3<ImagePrecision>,
    ) -> InternalDataRepresentation {
        let (_, height, width) = image.dim();
        let cols = self.im2col(image);
        let mut out = kernel_matrix.dot(&cols.t());
        out += &self.bias.view().insert_axis(Axis(1));
        out.into_shape((self.output_channels(), height, width))
            .expect("matrix product is in standard layout")
    }

    fn pad(&self, image: ArrayView3<ImagePrecision>) -> InternalDataRepresentation {
        let (pad_h, pad_w) = self.padding();
        let (channels, height, width) = image.dim();
        let mut padded = Array3::zeros((channels, height + 2 * pad_h, width + 2 * pad_w));
        padded
            .slice_mut(s![.., pad_h..pad_h + height, pad_w..pad_w + width])
            .assign(&image);
        padded
    }

    /// Returns a (H*W, C*HH*WW) matrix, every row is the receptive field of one output pixel.
    fn im2col(&self, image: ArrayView3<ImagePrecision>) -> Array2<ImagePrecision> {
        let (channels, height, width) = image.dim();
        let (kernel_height, kernel_width) = self.kernel_size();
        let padded = self.pad(image);

        let mut cols = Array2::zeros((height * width, channels * kernel_height * kernel_width));
        for (row_idx, mut row) in cols.outer_iter_mut().enumerate() {
            let (y, x) = (row_idx / width, row_idx % width);
            let patch = padded.slice(s![.., y..y + kernel_height, x..x + kernel_width]);
            for (dst, src) in row.iter_mut().zip(patch.iter()) {
                *dst = *src;
            }
        }
        cols
    }

    /// Inverse of im2col, overlapping patches are summed up.
    fn col2im(
        &self,
        cols: &Array2<ImagePrecision>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> InternalDataRepresentation {
        let (kernel_height, kernel_width) = self.kernel_size();
        let (pad_h, pad_w) = self.padding();
        let mut padded: Array3<ImagePrecision> =
            Array::zeros((channels, height + 2 * pad_h, width + 2 * pad_w));

        for (row_idx, row) in cols.outer_iter().enumerate() {
            let (y, x) = (row_idx / width, row_idx % width);
            let mut patch = padded.slice_mut(s![.., y..y + kernel_height, x..x + kernel_width]);
            for (dst, src) in patch.iter_mut().zip(row.iter()) {
                *dst += *src;
            }
        }
        padded
            .slice(s![.., pad_h..pad_h + height, pad_w..pad_w + width])
            .to_owned()
    }
}
