use crate::{
    activation_functions::{ReluLayer, SigmoidLayer},
    convolutions::{ConvGradients, ConvolutionLayer},
    sampling::{MaxPoolLayer, UpsampleLayer},
    Batch,
};

/// One step of the autoencoder. The model is a plain chain of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Convolution(ConvolutionLayer),
    Relu(ReluLayer),
    Sigmoid(SigmoidLayer),
    MaxPool(MaxPoolLayer),
    Upsample(UpsampleLayer),
}

impl Layer {
    /// Layer type as shown in summaries and plots
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Convolution(_) => "Conv2D",
            Layer::Relu(_) => "ReLU",
            Layer::Sigmoid(_) => "Sigmoid",
            Layer::MaxPool(_) => "MaxPooling2D",
            Layer::Upsample(_) => "UpSampling2D",
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Convolution(conv) => conv.num_parameters(),
            _ => 0,
        }
    }

    /// Output shape (channels, height, width) for a single input image of the given shape
    pub fn output_shape(&self, input_shape: (usize, usize, usize)) -> (usize, usize, usize) {
        match self {
            Layer::Convolution(conv) => conv.output_shape(input_shape),
            Layer::Relu(_) | Layer::Sigmoid(_) => input_shape,
            Layer::MaxPool(pool) => pool.output_shape(input_shape),
            Layer::Upsample(upsample) => upsample.output_shape(input_shape),
        }
    }

    pub fn forward(&self, input: &Batch) -> Batch {
        match self {
            Layer::Convolution(conv) => conv.forward(input),
            Layer::Relu(relu) => relu.activate(input),
            Layer::Sigmoid(sigmoid) => sigmoid.activate(input),
            Layer::MaxPool(pool) => pool.forward(input),
            Layer::Upsample(upsample) => upsample.forward(input),
        }
    }

    /// Propagates `grad_output` back through the layer. `input` and `output` are the
    /// values of the forward pass. Only convolutions return parameter gradients.
    pub fn backward(
        &self,
        input: &Batch,
        output: &Batch,
        grad_output: &Batch,
    ) -> (Batch, Option<ConvGradients>) {
        match self {
            Layer::Convolution(conv) => {
                let (grad_input, gradients) = conv.backward(input, grad_output);
                (grad_input, Some(gradients))
            }
            Layer::Relu(relu) => (relu.backward(input, grad_output), None),
            Layer::Sigmoid(sigmoid) => (sigmoid.backward(output, grad_output), None),
            Layer::MaxPool(pool) => (pool.backward(input, grad_output), None),
            Layer::Upsample(upsample) => (upsample.backward(input, grad_output), None),
        }
    }

    pub fn as_convolution(&self) -> Option<&ConvolutionLayer> {
        match self {
            Layer::Convolution(conv) => Some(conv),
            _ => None,
        }
    }

    pub fn as_convolution_mut(&mut self) -> Option<&mut ConvolutionLayer> {
        match self {
            Layer::Convolution(conv) => Some(conv),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::*;

    #[test]
    fn test_chain_shapes() {
        let mut rng = rand::thread_rng();
        let chain = vec![
            Layer::Convolution(ConvolutionLayer::glorot(3, 4, 3, &mut rng)),
            Layer::Relu(ReluLayer::new()),
            Layer::MaxPool(MaxPoolLayer::new()),
            Layer::Upsample(UpsampleLayer::new()),
            Layer::Sigmoid(SigmoidLayer::new()),
        ];

        let mut shape = (3, 8, 6);
        let mut x: Batch = Array::ones((2, 3, 8, 6));
        for layer in chain.iter() {
            shape = layer.output_shape(shape);
            x = layer.forward(&x);
            assert_eq!(x.dim(), (2, shape.0, shape.1, shape.2));
        }
        assert_eq!(shape, (4, 8, 6));
        assert_eq!(chain.iter().map(Layer::num_parameters).sum::<usize>(), 4 * 3 * 9 + 4);
    }

    #[test]
    fn test_only_convolutions_have_gradients() {
        let x: Batch = Array::ones((1, 1, 2, 2));
        let relu = Layer::Relu(ReluLayer::new());
        let out = relu.forward(&x);
        let (grad, params) = relu.backward(&x, &out, &out);
        assert_eq!(grad, x);
        assert!(params.is_none());

        let conv = Layer::Convolution(ConvolutionLayer::new(
            Array::ones((1, 1, 1, 1)),
            array![0.],
        ));
        let out = conv.forward(&x);
        let (_, params) = conv.backward(&x, &out, &out);
        assert_eq!(params.unwrap().bias, array![4.]);
    }
}
