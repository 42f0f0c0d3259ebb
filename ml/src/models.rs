//! The convolutional autoencoder.
//!
//! Every filter count of the configuration adds one conv 3x3 / ReLU / 2x2 max pooling
//! block to the encoder and a mirrored conv 3x3 / ReLU / upsampling block to the decoder.
//! A final conv 3x3 with sigmoid activation maps back to the image channels.
//! The latent space therefore has `(h / 2^n) * (w / 2^n) * filters.last()` entries.
use crate::{
    activation_functions::{ReluLayer, SigmoidLayer},
    convolutions::{ConvGradients, ConvolutionLayer},
    data_source::DataSource,
    history::{EpochStats, Evaluation, TrainingHistory},
    layers::Layer,
    losses::{mae, mse, mse_gradient},
    optimizers::{Optimizer, OptimizerKind},
    sampling::{MaxPoolLayer, UpsampleLayer},
    weight_loader::{NpzWeightLoader, NpzWeightWriter, WeightLoader},
    Batch, ModelError, ModelResult,
};
use log::{debug, info};
use ndarray::Axis;
use rand::{rngs::StdRng, SeedableRng};
use serde_derive::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const KERNEL_SIZE: usize = 3;

/// Shape of the input images, in the (height, width, channels) order image files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// The shape in Pytorch layout, (channels, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

impl Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    /// Seed of the weight initialisation
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            seed: 42,
        }
    }
}

/// Everything but the weights, stored as JSON next to the weight archive.
#[derive(Serialize, Deserialize)]
struct ModelDescription {
    input_shape: ImageShape,
    filters: Vec<usize>,
    config: TrainingConfig,
    history: TrainingHistory,
    evaluation: Option<Evaluation>,
}

#[derive(Debug, Clone)]
pub struct AutoModel {
    input_shape: ImageShape,
    filters: Vec<usize>,
    config: TrainingConfig,
    encoder: Vec<Layer>,
    decoder: Vec<Layer>,
    history: TrainingHistory,
    evaluation: Option<Evaluation>,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path: OsString = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn description_path(base: &Path) -> PathBuf {
    with_suffix(base, ".json")
}

fn weights_path(base: &Path) -> PathBuf {
    with_suffix(base, ".npz")
}

impl AutoModel {
    /// Builds a freshly initialised autoencoder for images of `input_shape`.
    pub fn create(
        input_shape: ImageShape,
        filters: &[usize],
        config: TrainingConfig,
    ) -> ModelResult<AutoModel> {
        if filters.is_empty() {
            return Err(ModelError::InvalidArchitecture(
                "at least one filter count is needed".to_string(),
            ));
        }
        if filters.contains(&0) {
            return Err(ModelError::InvalidArchitecture(format!(
                "filter counts must be positive, got {:?}",
                filters
            )));
        }
        let (channels, height, width) = input_shape.dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(ModelError::InvalidArchitecture(format!(
                "input shape {} has an empty dimension",
                input_shape
            )));
        }
        let scale = 1usize
            .checked_shl(filters.len() as u32)
            .filter(|s| height % s == 0 && width % s == 0)
            .ok_or_else(|| {
                ModelError::InvalidArchitecture(format!(
                    "{} filter blocks halve the resolution {} times, which {} does not allow",
                    filters.len(),
                    filters.len(),
                    input_shape
                ))
            })?;
        debug!("Creating autoencoder with downscaling factor {}", scale);

        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut encoder = Vec::with_capacity(3 * filters.len());
        let mut in_channels = channels;
        for &f in filters {
            encoder.push(Layer::Convolution(ConvolutionLayer::glorot(
                in_channels,
                f,
                KERNEL_SIZE,
                &mut rng,
            )));
            encoder.push(Layer::Relu(ReluLayer::new()));
            encoder.push(Layer::MaxPool(MaxPoolLayer::new()));
            in_channels = f;
        }

        let mut decoder = Vec::with_capacity(3 * filters.len() + 2);
        for &f in filters.iter().rev() {
            decoder.push(Layer::Convolution(ConvolutionLayer::glorot(
                in_channels,
                f,
                KERNEL_SIZE,
                &mut rng,
            )));
            decoder.push(Layer::Relu(ReluLayer::new()));
            decoder.push(Layer::Upsample(UpsampleLayer::new()));
            in_channels = f;
        }
        decoder.push(Layer::Convolution(ConvolutionLayer::glorot(
            in_channels,
            channels,
            KERNEL_SIZE,
            &mut rng,
        )));
        decoder.push(Layer::Sigmoid(SigmoidLayer::new()));

        Ok(AutoModel {
            input_shape,
            filters: filters.to_vec(),
            config,
            encoder,
            decoder,
            history: TrainingHistory::new(),
            evaluation: None,
        })
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    pub fn filters(&self) -> &[usize] {
        &self.filters
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn encoder_layers(&self) -> &[Layer] {
        &self.encoder
    }

    pub fn decoder_layers(&self) -> &[Layer] {
        &self.decoder
    }

    /// Epochs of every `fit` call so far
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Result of the latest `evaluate` call
    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    /// Shape of the encoded features, (channels, height, width)
    pub fn latent_shape(&self) -> (usize, usize, usize) {
        self.encoder
            .iter()
            .fold(self.input_shape.dim(), |shape, layer| layer.output_shape(shape))
    }

    pub fn latent_size(&self) -> usize {
        let (c, h, w) = self.latent_shape();
        c * h * w
    }

    pub fn num_parameters(&self) -> usize {
        self.encoder
            .iter()
            .chain(self.decoder.iter())
            .map(Layer::num_parameters)
            .sum()
    }

    fn check_shape(batch: &Batch, expected: (usize, usize, usize)) -> ModelResult<()> {
        let (_, c, h, w) = batch.dim();
        if (c, h, w) != expected {
            return Err(ModelError::ShapeMismatch {
                expected: vec![expected.0, expected.1, expected.2],
                found: batch.shape()[1..].to_vec(),
            });
        }
        Ok(())
    }

    fn run(layers: &[Layer], batch: &Batch) -> Batch {
        layers
            .iter()
            .fold(batch.clone(), |data, layer| layer.forward(&data))
    }

    /// Encodes a batch of images into their latent representation.
    pub fn encode(&self, batch: &Batch) -> ModelResult<Batch> {
        Self::check_shape(batch, self.input_shape.dim())?;
        Ok(Self::run(&self.encoder, batch))
    }

    /// Reconstructs images from latent features.
    pub fn decode(&self, features: &Batch) -> ModelResult<Batch> {
        Self::check_shape(features, self.latent_shape())?;
        Ok(Self::run(&self.decoder, features))
    }

    /// Encodes and decodes in one go.
    pub fn predict(&self, batch: &Batch) -> ModelResult<Batch> {
        self.decode(&self.encode(batch)?)
    }

    /// One optimisation step on a single batch. Returns (mse, mae) before the update.
    fn train_step(
        &mut self,
        optimizer: &mut dyn Optimizer,
        input: &Batch,
        target: &Batch,
    ) -> ModelResult<(f32, f32)> {
        Self::check_shape(input, self.input_shape.dim())?;

        let (gradients, loss, abs_error) = {
            let layers: Vec<&Layer> = self.encoder.iter().chain(self.decoder.iter()).collect();

            // activations[i] is the input of layers[i], the last entry is the reconstruction
            let mut activations = Vec::with_capacity(layers.len() + 1);
            let mut current = input.clone();
            for layer in layers.iter() {
                let next = layer.forward(&current);
                activations.push(current);
                current = next;
            }
            activations.push(current);

            let output = &activations[layers.len()];
            let loss = mse(output, target)?;
            let abs_error = mae(output, target)?;
            let mut grad = mse_gradient(output, target)?;

            let mut gradients: Vec<Option<ConvGradients>> = vec![None; layers.len()];
            for (i, layer) in layers.iter().enumerate().rev() {
                let (grad_input, params) =
                    layer.backward(&activations[i], &activations[i + 1], &grad);
                gradients[i] = params;
                grad = grad_input;
            }
            (gradients, loss, abs_error)
        };

        let params: Vec<(&mut ConvolutionLayer, &ConvGradients)> = self
            .encoder
            .iter_mut()
            .chain(self.decoder.iter_mut())
            .zip(gradients.iter())
            .filter_map(|(layer, grads)| match (layer.as_convolution_mut(), grads) {
                (Some(conv), Some(grads)) => Some((conv, grads)),
                _ => None,
            })
            .collect();
        optimizer.step(params);

        Ok((loss, abs_error))
    }

    /// Trains the model for `epochs` passes over `train`. The validation source,
    /// if any, is measured after every epoch. The epochs are appended to the
    /// model history and returned. A non-finite loss stops training with
    /// `ModelError::Diverged` and leaves the history untouched.
    pub fn fit(
        &mut self,
        train: &mut dyn DataSource,
        validation: Option<&dyn DataSource>,
        epochs: usize,
    ) -> ModelResult<TrainingHistory> {
        if epochs == 0 {
            return Err(ModelError::NoEpochs);
        }
        if train.num_batches() == 0 {
            return Err(ModelError::EmptySource);
        }
        let mut optimizer = self.config.optimizer.build(self.config.learning_rate);
        let mut history = TrainingHistory::new();

        for epoch in 1..=epochs {
            let start = Instant::now();
            let (mut loss_sum, mut mae_sum, mut seen) = (0f64, 0f64, 0usize);
            let num_batches = train.num_batches();

            for index in 0..num_batches {
                let (input, target) = train.batch(index).map_err(ModelError::DataSource)?;
                let n = input.len_of(Axis(0));
                let (loss, abs_error) = self.train_step(optimizer.as_mut(), &input, &target)?;
                debug!(
                    "Epoch {} batch {}/{}: loss {:.6}",
                    epoch,
                    index + 1,
                    num_batches,
                    loss
                );
                loss_sum += f64::from(loss) * n as f64;
                mae_sum += f64::from(abs_error) * n as f64;
                seen += n;
            }

            let seen = seen.max(1) as f64;
            let validated = match validation {
                Some(source) => Some(self.measure(source)?),
                None => None,
            };
            let stats = EpochStats {
                loss: (loss_sum / seen) as f32,
                mae: (mae_sum / seen) as f32,
                val_loss: validated.map(|e| e.loss),
                val_mae: validated.map(|e| e.mae),
            };
            if !stats.is_finite() {
                return Err(ModelError::Diverged(format!(
                    "epoch {} ended with loss {} and validation loss {:?}",
                    epoch, stats.loss, stats.val_loss
                )));
            }

            match validated {
                Some(v) => info!(
                    "Epoch {}/{} - {:.1}s - loss: {:.6} - mae: {:.6} - val_loss: {:.6} - val_mae: {:.6}",
                    epoch,
                    epochs,
                    start.elapsed().as_secs_f32(),
                    stats.loss,
                    stats.mae,
                    v.loss,
                    v.mae
                ),
                None => info!(
                    "Epoch {}/{} - {:.1}s - loss: {:.6} - mae: {:.6}",
                    epoch,
                    epochs,
                    start.elapsed().as_secs_f32(),
                    stats.loss,
                    stats.mae
                ),
            }
            history.push(stats);
            train.on_epoch_end();
        }

        self.history.extend(history.clone());
        Ok(history)
    }

    /// Mean loss and MAE over all batches of the source, weighted by batch size.
    fn measure(&self, source: &dyn DataSource) -> ModelResult<Evaluation> {
        if source.num_batches() == 0 {
            return Err(ModelError::EmptySource);
        }
        let (mut loss_sum, mut mae_sum, mut seen) = (0f64, 0f64, 0usize);
        for index in 0..source.num_batches() {
            let (input, target) = source.batch(index).map_err(ModelError::DataSource)?;
            let n = input.len_of(Axis(0));
            let output = self.predict(&input)?;
            loss_sum += f64::from(mse(&output, &target)?) * n as f64;
            mae_sum += f64::from(mae(&output, &target)?) * n as f64;
            seen += n;
        }
        let seen = seen.max(1) as f64;
        Ok(Evaluation {
            loss: (loss_sum / seen) as f32,
            mae: (mae_sum / seen) as f32,
        })
    }

    /// Evaluates the model on the source and keeps the result with the model.
    pub fn evaluate(&mut self, source: &dyn DataSource) -> ModelResult<Evaluation> {
        let evaluation = self.measure(source)?;
        if !evaluation.is_finite() {
            return Err(ModelError::Diverged(format!(
                "evaluation loss is {}",
                evaluation.loss
            )));
        }
        info!("Evaluation - loss: {:.6} - mae: {:.6}", evaluation.loss, evaluation.mae);
        self.evaluation = Some(evaluation);
        Ok(evaluation)
    }

    /// (name, layer, output shape) for every layer, in execution order
    fn layer_table(&self) -> Vec<(String, &Layer, (usize, usize, usize))> {
        let mut shape = self.input_shape.dim();
        let mut table = Vec::with_capacity(self.encoder.len() + self.decoder.len());
        for (part, layers) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            for (i, layer) in layers.iter().enumerate() {
                shape = layer.output_shape(shape);
                table.push((format!("{}.{}", part, i), layer, shape));
            }
        }
        table
    }

    /// Keras-like textual summary of the model
    pub fn summary(&self) -> String {
        let rule = "_".repeat(72);
        let double_rule = "=".repeat(72);
        let mut lines = vec![
            format!(
                "Model: \"autoencoder\" (input {}, filters {:?})",
                self.input_shape, self.filters
            ),
            rule.clone(),
            format!("{:<32}{:<28}{:>12}", "Layer (type)", "Output Shape", "Param #"),
            double_rule.clone(),
        ];
        for (name, layer, shape) in self.layer_table() {
            lines.push(format!(
                "{:<32}{:<28}{:>12}",
                format!("{} ({})", name, layer.kind()),
                format!("{:?}", shape),
                layer.num_parameters()
            ));
        }
        lines.push(double_rule);
        lines.push(format!("Total params: {}", self.num_parameters()));
        lines.push(format!(
            "Latent space: {:?} = {}",
            self.latent_shape(),
            self.latent_size()
        ));
        lines.push(rule);
        lines.join("\n")
    }

    /// Graphviz description of the layer chain
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph autoencoder {\n    node [shape=record];\n");
        dot.push_str(&format!(
            "    input [label=\"input|{:?}\"];\n",
            self.input_shape.dim()
        ));
        let mut previous = "input".to_string();
        for (name, layer, shape) in self.layer_table() {
            let node = name.replace('.', "_");
            dot.push_str(&format!(
                "    {} [label=\"{}: {}|{:?}\"];\n",
                node,
                name,
                layer.kind(),
                shape
            ));
            dot.push_str(&format!("    {} -> {};\n", previous, node));
            previous = node;
        }
        dot.push_str("}\n");
        dot
    }

    /// Writes the Graphviz description of the model to `path`.
    pub fn plot<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        fs::write(path, self.to_dot())?;
        Ok(())
    }

    /// Draws the loss curves of the training history into a PNG file.
    pub fn plot_training_history<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        self.history.plot(path)
    }

    fn named_convolutions(&self) -> Vec<(String, &ConvolutionLayer)> {
        let encoder = self.encoder.iter().enumerate().filter_map(|(i, l)| {
            l.as_convolution()
                .map(|conv| (format!("encoder.{}", i), conv))
        });
        let decoder = self.decoder.iter().enumerate().filter_map(|(i, l)| {
            l.as_convolution()
                .map(|conv| (format!("decoder.{}", i), conv))
        });
        encoder.chain(decoder).collect()
    }

    fn named_convolutions_mut(&mut self) -> Vec<(String, &mut ConvolutionLayer)> {
        let encoder = self.encoder.iter_mut().enumerate().filter_map(|(i, l)| {
            l.as_convolution_mut()
                .map(|conv| (format!("encoder.{}", i), conv))
        });
        let decoder = self.decoder.iter_mut().enumerate().filter_map(|(i, l)| {
            l.as_convolution_mut()
                .map(|conv| (format!("decoder.{}", i), conv))
        });
        encoder.chain(decoder).collect()
    }

    /// Saves the model as `<base>.json` (architecture, history, evaluation)
    /// and `<base>.npz` (weights).
    pub fn save<P: AsRef<Path>>(&self, base: P) -> ModelResult<()> {
        let base = base.as_ref();
        // nothing is written for a broken model, `is_saved` stays false
        if !self.history.is_finite() || !self.evaluation.map_or(true, |e| e.is_finite()) {
            return Err(ModelError::Diverged(
                "history or evaluation is not finite".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .named_convolutions()
            .into_iter()
            .find(|(_, conv)| !conv.is_finite())
        {
            return Err(ModelError::Diverged(format!(
                "weights of {} are not finite",
                name
            )));
        }
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let description = ModelDescription {
            input_shape: self.input_shape,
            filters: self.filters.clone(),
            config: self.config,
            history: self.history.clone(),
            evaluation: self.evaluation,
        };
        fs::write(
            description_path(base),
            serde_json::to_string_pretty(&description)?,
        )?;

        let mut writer = NpzWeightWriter::create(weights_path(base))?;
        for (name, conv) in self.named_convolutions() {
            writer.add_weight(&format!("{}.kernel", name), conv.kernel())?;
            writer.add_weight(&format!("{}.bias", name), conv.bias())?;
        }
        writer.finish()?;

        info!("Saved model to {}", base.display());
        Ok(())
    }

    /// Loads a model previously written by `save`.
    pub fn load<P: AsRef<Path>>(base: P) -> ModelResult<AutoModel> {
        let base = base.as_ref();
        let raw = fs::read_to_string(description_path(base))?;
        let description: ModelDescription = serde_json::from_str(&raw)?;

        let mut model =
            AutoModel::create(description.input_shape, &description.filters, description.config)?;
        let mut loader = NpzWeightLoader::from_path(weights_path(base))?;
        for (name, conv) in model.named_convolutions_mut() {
            let kernel = loader.get_weight(&format!("{}.kernel", name), conv.kernel().raw_dim())?;
            let bias = loader.get_weight(&format!("{}.bias", name), conv.bias().raw_dim())?;
            *conv = ConvolutionLayer::new(kernel, bias);
        }
        model.history = description.history;
        model.evaluation = description.evaluation;

        info!("Loaded model from {}", base.display());
        Ok(model)
    }

    /// Whether `save` has written both model files for this base path.
    pub fn is_saved<P: AsRef<Path>>(base: P) -> bool {
        let base = base.as_ref();
        description_path(base).is_file() && weights_path(base).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataSourceError, InMemorySource};
    use ndarray::*;
    use tempfile::tempdir;

    fn small_model() -> AutoModel {
        AutoModel::create(ImageShape::new(8, 8, 1), &[2, 3], TrainingConfig::default()).unwrap()
    }

    fn images(n: usize, shape: ImageShape) -> Batch {
        Array::from_shape_fn(
            (n, shape.channels, shape.height, shape.width),
            |(i, c, y, x)| 0.8 + 0.1 * (((i + c + y * 3 + x) % 4) as f32 / 3.0 - 0.5),
        )
    }

    #[test]
    fn test_latent_sizes_of_sweep() {
        let shape = ImageShape::new(64, 64, 3);
        let cases: Vec<(Vec<usize>, usize)> = vec![
            (vec![128, 128, 16], 1024),
            (vec![128, 4], 1024),
            (vec![128, 8], 2048),
            (vec![128, 128, 32], 2048),
            (vec![128, 16], 4096),
            (vec![128, 128, 64], 4096),
            (vec![128, 32], 8192),
            (vec![128, 128, 128], 8192),
        ];
        for (filters, size) in cases {
            let model = AutoModel::create(shape, &filters, TrainingConfig::default()).unwrap();
            assert_eq!(model.latent_size(), size, "filters {:?}", filters);
        }
    }

    #[test]
    fn test_invalid_architectures() {
        let shape = ImageShape::new(6, 6, 3);
        let config = TrainingConfig::default();
        for filters in [vec![], vec![4, 0], vec![4, 4]] {
            assert!(matches!(
                AutoModel::create(shape, &filters, config),
                Err(ModelError::InvalidArchitecture(_))
            ));
        }
        assert!(AutoModel::create(shape, &[4], config).is_ok());
        assert!(AutoModel::create(ImageShape::new(0, 4, 1), &[1], config).is_err());
    }

    #[test]
    fn test_encode_decode_shapes() {
        let model = small_model();
        assert_eq!(model.latent_shape(), (3, 2, 2));

        let batch = images(3, model.input_shape());
        let features = model.encode(&batch).unwrap();
        assert_eq!(features.dim(), (3, 3, 2, 2));

        let decoded = model.decode(&features).unwrap();
        assert_eq!(decoded.dim(), (3, 1, 8, 8));
        assert!(decoded.iter().all(|&v| v > 0. && v < 1.));
        assert_eq!(model.predict(&batch).unwrap(), decoded);
    }

    #[test]
    fn test_wrong_shapes_are_rejected() {
        let model = small_model();
        let batch: Batch = Array::zeros((1, 3, 8, 8));
        assert!(matches!(
            model.encode(&batch),
            Err(ModelError::ShapeMismatch { .. })
        ));
        assert!(model.decode(&Array::zeros((1, 2, 2, 2))).is_err());
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = small_model();
        let b = small_model();
        let batch = images(2, a.input_shape());
        assert_eq!(a.predict(&batch).unwrap(), b.predict(&batch).unwrap());
    }

    #[test]
    fn test_fit_reduces_loss() {
        let shape = ImageShape::new(4, 4, 1);
        let config = TrainingConfig {
            learning_rate: 0.01,
            ..Default::default()
        };
        let mut model = AutoModel::create(shape, &[4], config).unwrap();
        let mut train = InMemorySource::new(images(4, shape), 2).unwrap();
        let validation = InMemorySource::new(images(2, shape), 2).unwrap();

        let history = model
            .fit(&mut train, Some(&validation as &dyn DataSource), 60)
            .unwrap();

        assert_eq!(history.len(), 60);
        assert_eq!(model.history().len(), 60);
        let first = history.epochs[0];
        let last = *history.last().unwrap();
        assert!(last.loss < first.loss, "{} !< {}", last.loss, first.loss);
        assert!(last.val_loss.unwrap() < first.val_loss.unwrap());

        model.fit(&mut train, None, 2).unwrap();
        assert_eq!(model.history().len(), 62);
        assert!(model.history().last().unwrap().val_loss.is_none());
    }

    #[test]
    fn test_fit_errors() {
        let mut model = small_model();
        let mut train = InMemorySource::new(images(2, model.input_shape()), 2).unwrap();
        assert!(matches!(
            model.fit(&mut train, None, 0),
            Err(ModelError::NoEpochs)
        ));

        let mut empty = InMemorySource::new(Array::zeros((0, 1, 8, 8)), 2).unwrap();
        assert!(matches!(
            model.fit(&mut empty, None, 1),
            Err(ModelError::EmptySource)
        ));
    }

    /// Passes batches through and counts the finished epochs
    struct CountingSource {
        inner: InMemorySource,
        epochs_ended: usize,
    }

    impl DataSource for CountingSource {
        fn num_batches(&self) -> usize {
            self.inner.num_batches()
        }

        fn batch(&self, index: usize) -> Result<(Batch, Batch), DataSourceError> {
            self.inner.batch(index)
        }

        fn on_epoch_end(&mut self) {
            self.epochs_ended += 1;
        }
    }

    #[test]
    fn test_fit_ends_every_epoch() {
        let mut model = small_model();
        let mut train = CountingSource {
            inner: InMemorySource::new(images(3, model.input_shape()), 2).unwrap(),
            epochs_ended: 0,
        };
        model.fit(&mut train, None, 3).unwrap();
        assert_eq!(train.epochs_ended, 3);
        model.fit(&mut train, None, 2).unwrap();
        assert_eq!(train.epochs_ended, 5);
    }

    #[test]
    fn test_diverged_training_is_rejected() {
        let mut model = small_model();
        let mut train =
            InMemorySource::new(Array::from_elem((2, 1, 8, 8), f32::NAN), 2).unwrap();
        assert!(matches!(
            model.fit(&mut train, None, 2),
            Err(ModelError::Diverged(_))
        ));
        assert!(model.history().is_empty());

        assert!(matches!(
            model.evaluate(&train),
            Err(ModelError::Diverged(_))
        ));
        assert!(model.evaluation().is_none());
    }

    #[test]
    fn test_non_finite_model_is_not_saved() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("diverged");

        let mut model = small_model();
        model.history.push(EpochStats {
            loss: f32::NAN,
            mae: 0.1,
            val_loss: None,
            val_mae: None,
        });
        assert!(matches!(model.save(&base), Err(ModelError::Diverged(_))));
        assert!(!AutoModel::is_saved(&base));

        let mut model = small_model();
        if let Some(conv) = model.encoder[0].as_convolution_mut() {
            conv.parameters_mut().0.fill(f32::INFINITY);
        }
        assert!(matches!(model.save(&base), Err(ModelError::Diverged(_))));
        assert!(!AutoModel::is_saved(&base));
        dir.close().unwrap();
    }

    #[test]
    fn test_evaluate_is_stored() {
        let mut model = small_model();
        let source = InMemorySource::new(images(3, model.input_shape()), 2).unwrap();
        assert!(model.evaluation().is_none());
        let evaluation = model.evaluate(&source).unwrap();
        assert_eq!(model.evaluation(), Some(&evaluation));
        assert!(evaluation.loss > 0.);
        assert!(evaluation.mae > 0.);
    }

    #[test]
    fn test_summary_and_dot() {
        let model = small_model();
        let summary = model.summary();
        assert!(summary.contains("encoder.0 (Conv2D)"));
        assert!(summary.contains("decoder.7 (Sigmoid)"));
        assert!(summary.contains(&format!("Total params: {}", model.num_parameters())));
        assert!(summary.contains("Latent space: (3, 2, 2) = 12"));

        let dot = model.to_dot();
        assert!(dot.starts_with("digraph autoencoder {"));
        assert!(dot.contains("input -> encoder_0;"));
        assert!(dot.contains("decoder_6 -> decoder_7;"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("models").join("TEST");

        let mut model = small_model();
        let mut train = InMemorySource::new(images(2, model.input_shape()), 2).unwrap();
        model.fit(&mut train, None, 2).unwrap();
        model.evaluate(&train).unwrap();

        assert!(!AutoModel::is_saved(&base));
        model.save(&base).unwrap();
        assert!(AutoModel::is_saved(&base));

        let loaded = AutoModel::load(&base).unwrap();
        assert_eq!(loaded.filters(), model.filters());
        assert_eq!(loaded.input_shape(), model.input_shape());
        assert_eq!(loaded.history(), model.history());
        assert_eq!(loaded.evaluation(), model.evaluation());
        let batch = images(2, model.input_shape());
        assert_eq!(loaded.predict(&batch).unwrap(), model.predict(&batch).unwrap());

        dir.close().unwrap();
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            AutoModel::load(dir.path().join("nothing")),
            Err(ModelError::Io(_))
        ));
    }
}
