//! Sources of training and evaluation batches.
//!
//! The model never touches the filesystem itself, it pulls (input, target) pairs from
//! a `DataSource`. Image generators live in their own crate and implement this trait.
use crate::{Batch, ModelError, ModelResult};
use ndarray::*;

/// Error type a data source may return. Boxed so that sources from other crates
/// can use their own error enums.
pub type DataSourceError = Box<dyn std::error::Error + Send + Sync>;

/// A Keras `Sequence`-like provider of batches.
pub trait DataSource {
    /// Number of batches in one epoch
    fn num_batches(&self) -> usize;

    /// Returns batch `index` as (input, target)
    fn batch(&self, index: usize) -> Result<(Batch, Batch), DataSourceError>;

    /// Called by the trainer after every epoch, f.e. to reshuffle
    fn on_epoch_end(&mut self) {}
}

/// Batches over images that are already in memory. Targets equal the inputs,
/// which is what an autoencoder learns.
pub struct InMemorySource {
    images: Batch,
    batch_size: usize,
}

impl InMemorySource {
    pub fn new(images: Batch, batch_size: usize) -> ModelResult<Self> {
        if batch_size == 0 {
            return Err(ModelError::ZeroBatchSize);
        }
        Ok(Self { images, batch_size })
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataSource for InMemorySource {
    fn num_batches(&self) -> usize {
        (self.len() + self.batch_size - 1) / self.batch_size
    }

    fn batch(&self, index: usize) -> Result<(Batch, Batch), DataSourceError> {
        if index >= self.num_batches() {
            return Err(format!(
                "Batch {} requested, but only {} batches available",
                index,
                self.num_batches()
            )
            .into());
        }
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.len());
        let images = self.images.slice(s![start..end, .., .., ..]).to_owned();
        Ok((images.clone(), images))
    }
}
