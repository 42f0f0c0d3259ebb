//! Building blocks for small convolutional autoencoders: layers with their
//! backward passes, losses, optimizers, and the `AutoModel` that ties them
//! together for training, evaluation and persistence.
//!
//! All data uses the Pytorch layout: a single image is (channels, height, width),
//! a batch is (n, channels, height, width).
use ndarray::{Array3, Array4};
use thiserror::Error;

pub mod activation_functions;
pub mod convolutions;
pub mod data_source;
pub mod history;
pub mod layers;
pub mod losses;
pub mod models;
pub mod optimizers;
pub mod sampling;
pub mod weight_loader;

pub use data_source::{DataSource, DataSourceError, InMemorySource};
pub use history::{EpochStats, Evaluation, TrainingHistory};
pub use models::{AutoModel, ImageShape, TrainingConfig};

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;
/// A single image, (channels, height, width)
pub type InternalDataRepresentation = Array3<ImagePrecision>;
/// A batch of images, (n, channels, height, width)
pub type Batch = Array4<ImagePrecision>;
pub type ConvKernel = Array4<WeightPrecision>;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid autoencoder architecture: {0}")]
    InvalidArchitecture(String),
    #[error("Wrong data shape, expected {expected:?} but got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("The data source does not provide any batch")]
    EmptySource,
    #[error("Training needs at least one epoch")]
    NoEpochs,
    #[error("Data source failed to provide a batch:\n {0}")]
    DataSource(#[source] DataSourceError),
    #[error("Model weights could not be handled:\n {0}")]
    Weights(#[from] weight_loader::WeightError),
    #[error("Model file could not be accessed. Filesystem reported error\n {0}.")]
    Io(#[from] std::io::Error),
    #[error("Model description is not valid JSON:\n {0}")]
    Json(#[from] serde_json::Error),
    #[error("Training diverged: {0}")]
    Diverged(String),
    #[error("Batch size of 0 passed")]
    ZeroBatchSize,
    #[error("Plot could not be drawn: {0}")]
    Plot(String),
}
