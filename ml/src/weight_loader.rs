use crate::WeightPrecision;
use ndarray::{Array, ArrayBase, Data, Dimension, StrideShape};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use thiserror::Error;

type WeightResult<T> = Result<T, WeightError>;

#[derive(Error, Debug)]
pub enum WeightError {
    #[error("No weights with name {0} found")]
    WeightKeyError(String),
    #[error("Weight file not found. Filesystem reported error\n {0}.")]
    WeightFileNotFoundError(#[from] std::io::Error),
    #[error("Weight file not readable. Filesystem reported error\n {0}.")]
    WeightFileNpzError(#[from] ReadNpzError),
    #[error("Weight file not writable. Filesystem reported error\n {0}.")]
    WeightFileWriteError(#[from] WriteNpzError),
    #[error("Weight {name} has shape {found:?}, but {expected:?} was expected")]
    WeightShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

pub trait WeightLoader {
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>;
}

/// Loads weights from a numpy `.npz` archive. Names may be given with or
/// without the `.npy` suffix numpy adds to every array.
pub struct NpzWeightLoader<R>
where
    R: Seek + Read,
{
    reader: NpzReader<R>,
}

impl NpzWeightLoader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> WeightResult<NpzWeightLoader<File>> {
        let handle = File::open(path)?;
        Ok(NpzWeightLoader {
            reader: NpzReader::new(handle)?,
        })
    }
}

impl<'a> NpzWeightLoader<Cursor<&'a [u8]>> {
    pub fn from_buffer(bytes_array: &'a [u8]) -> WeightResult<NpzWeightLoader<Cursor<&'a [u8]>>> {
        Ok(NpzWeightLoader {
            reader: NpzReader::new(Cursor::new(bytes_array))?,
        })
    }
}

impl<R> NpzWeightLoader<R>
where
    R: Seek + Read,
{
    /// Names of all arrays in the archive, as stored
    pub fn names(&mut self) -> WeightResult<Vec<String>> {
        Ok(self.reader.names()?)
    }

    fn resolve_name(&mut self, param_name: &str) -> WeightResult<String> {
        let wanted = param_name.trim_end_matches(".npy");
        self.names()?
            .into_iter()
            .find(|name| name.trim_end_matches(".npy") == wanted)
            .ok_or_else(|| WeightError::WeightKeyError(param_name.to_string()))
    }
}

impl<R> WeightLoader for NpzWeightLoader<R>
where
    R: Seek + Read,
{
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>,
    {
        let stored_name = self.resolve_name(param_name)?;
        let arr: Array<WeightPrecision, D> = self.reader.by_name(&stored_name)?;

        let expected_shape: StrideShape<D> = shape.into();
        let expected = expected_shape.raw_dim().clone();
        if arr.raw_dim() != expected {
            return Err(WeightError::WeightShapeMismatch {
                name: param_name.to_string(),
                expected: expected.slice().to_vec(),
                found: arr.shape().to_vec(),
            });
        }
        Ok(arr)
    }
}

/// Collects named arrays into a numpy `.npz` archive.
pub struct NpzWeightWriter {
    writer: NpzWriter<File>,
}

impl NpzWeightWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> WeightResult<NpzWeightWriter> {
        let file = File::create(path)?;
        Ok(NpzWeightWriter {
            writer: NpzWriter::new(file),
        })
    }

    pub fn add_weight<S, D>(&mut self, param_name: &str, weight: &ArrayBase<S, D>) -> WeightResult<()>
    where
        S: Data<Elem = WeightPrecision>,
        D: Dimension,
    {
        self.writer.add_array(param_name, weight)?;
        Ok(())
    }

    pub fn finish(self) -> WeightResult<()> {
        self.writer.finish()?;
        Ok(())
    }
}
