//! Batches of images read lazily from disk.
use crate::{load_image, DataError, DataResult};
use log::debug;
use ml::{Batch, DataSource, DataSourceError, ImageShape};
use ndarray::*;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::path::PathBuf;

/// Keras `Sequence`-like generator over image files. Every batch is (x, x), as
/// the autoencoder learns to reproduce its input.
///
/// A randomized generator visits the files in a new order every epoch, otherwise
/// the order of `files` is kept.
#[derive(Debug)]
pub struct AutoGenerator {
    files: Vec<PathBuf>,
    shape: ImageShape,
    batch_size: usize,
    randomize: bool,
    order: Vec<usize>,
    rng: StdRng,
}

impl AutoGenerator {
    pub fn new(
        files: Vec<PathBuf>,
        shape: ImageShape,
        batch_size: usize,
        randomize: bool,
        seed: u64,
    ) -> DataResult<AutoGenerator> {
        if files.is_empty() {
            return Err(DataError::NoFiles);
        }
        if batch_size == 0 {
            return Err(DataError::ZeroBatchSize);
        }
        let mut generator = AutoGenerator {
            order: (0..files.len()).collect(),
            files,
            shape,
            batch_size,
            randomize,
            rng: StdRng::seed_from_u64(seed),
        };
        if randomize {
            generator.shuffle();
        }
        Ok(generator)
    }

    fn shuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Files in the order the current epoch visits them
    pub fn files(&self) -> Vec<&PathBuf> {
        self.order.iter().map(|&i| &self.files[i]).collect()
    }

    pub fn num_batches(&self) -> usize {
        (self.len() + self.batch_size - 1) / self.batch_size
    }

    /// Loads batch `index` as (n, c, h, w) array. The last batch may be shorter.
    pub fn images(&self, index: usize) -> DataResult<Batch> {
        let available = self.num_batches();
        if index >= available {
            return Err(DataError::BatchOutOfRange { index, available });
        }
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.len());
        debug!("Loading images {}..{}", start, end);

        let (c, h, w) = self.shape.dim();
        let mut batch = Batch::zeros((end - start, c, h, w));
        for (mut slot, &file) in batch
            .axis_iter_mut(Axis(0))
            .zip(self.order[start..end].iter())
        {
            slot.assign(&load_image(&self.files[file], self.shape)?);
        }
        Ok(batch)
    }
}

impl DataSource for AutoGenerator {
    fn num_batches(&self) -> usize {
        AutoGenerator::num_batches(self)
    }

    fn batch(&self, index: usize) -> Result<(Batch, Batch), DataSourceError> {
        let images = self.images(index)?;
        Ok((images.clone(), images))
    }

    fn on_epoch_end(&mut self) {
        if self.randomize {
            self.shuffle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_png;
    use tempfile::tempdir;

    fn files(dir: &std::path::Path, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| write_png(dir, &format!("{}.png", i), 4, (i * 20) as u8))
            .collect()
    }

    #[test]
    fn test_deterministic_batches() {
        let dir = tempdir().unwrap();
        let shape = ImageShape::new(4, 4, 3);
        let mut generator = AutoGenerator::new(files(dir.path(), 5), shape, 2, false, 0).unwrap();

        assert_eq!(DataSource::num_batches(&generator), 3);
        let (x, y) = generator.batch(0).unwrap();
        assert_eq!(x, y);
        assert_eq!(x.dim(), (2, 3, 4, 4));
        assert_eq!(x[[1, 0, 0, 0]], 20.0 / 255.0);

        let (last, _) = generator.batch(2).unwrap();
        assert_eq!(last.dim(), (1, 3, 4, 4));
        assert_eq!(last[[0, 0, 0, 0]], 80.0 / 255.0);
        assert!(generator.batch(3).is_err());

        generator.on_epoch_end();
        assert_eq!(generator.batch(0).unwrap().0, x);
        dir.close().unwrap();
    }

    #[test]
    fn test_randomized_order() {
        let dir = tempdir().unwrap();
        let shape = ImageShape::new(4, 4, 3);
        let files = files(dir.path(), 20);
        let mut generator = AutoGenerator::new(files.clone(), shape, 4, true, 3).unwrap();

        let first: Vec<PathBuf> = generator.files().into_iter().cloned().collect();
        let mut sorted = first.clone();
        sorted.sort();
        let mut expected = files.clone();
        expected.sort();
        assert_eq!(sorted, expected);

        generator.on_epoch_end();
        let second: Vec<PathBuf> = generator.files().into_iter().cloned().collect();
        assert_ne!(first, second);

        let same_seed = AutoGenerator::new(files, shape, 4, true, 3).unwrap();
        let again: Vec<PathBuf> = same_seed.files().into_iter().cloned().collect();
        assert_eq!(first, again);
        dir.close().unwrap();
    }

    #[test]
    fn test_invalid_generators() {
        let shape = ImageShape::new(4, 4, 3);
        assert!(matches!(
            AutoGenerator::new(vec![], shape, 2, false, 0),
            Err(DataError::NoFiles)
        ));
        assert!(matches!(
            AutoGenerator::new(vec![PathBuf::from("a.png")], shape, 0, false, 0),
            Err(DataError::ZeroBatchSize)
        ));
    }

    #[test]
    fn test_channel_mismatch_surfaces() {
        let dir = tempdir().unwrap();
        let generator =
            AutoGenerator::new(files(dir.path(), 2), ImageShape::new(4, 4, 1), 2, false, 0)
                .unwrap();
        assert!(generator.images(0).is_err());
        assert!(generator.batch(0).is_err());
        dir.close().unwrap();
    }
}
