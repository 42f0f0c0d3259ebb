use crate::{to_pixel, DataError, DataResult};
use ml::{losses::psnr, Batch};
use ndarray::*;
use std::fmt::Display;

/// Mean squared error in 8 bit pixel space
fn mse(orig: &Array4<u8>, rec: &Array4<u8>) -> f64 {
    let orig_f = orig.mapv(|a| a as f64);
    let rec_f = rec.mapv(|a| a as f64);
    (orig_f - rec_f).mapv(|a| a.powi(2)).sum() / (orig.len().max(1) as f64)
}

/// Reconstruction quality and speed of an autoencoder on one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub mse: f64,
    pub psnr: f64,
    pub encoding_time: f64,
    pub decoding_time: f64,
}

impl Statistics {
    /// Compares the batches after quantizing both to pixels. Times are in seconds.
    pub fn new(
        original: &Batch,
        reconstructed: &Batch,
        encoding_time: f64,
        decoding_time: f64,
    ) -> DataResult<Statistics> {
        if original.shape() != reconstructed.shape() {
            return Err(DataError::ShapeMismatch {
                expected: original.shape().to_vec(),
                found: reconstructed.shape().to_vec(),
            });
        }
        let mse = mse(&original.map(to_pixel), &reconstructed.map(to_pixel));
        Ok(Statistics {
            mse,
            psnr: psnr(mse, 255.0),
            encoding_time,
            decoding_time,
        })
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MSE: {:.4}\nPSNR: {:.2} dB\nTime to encode: {:.4} s\nTime to decode: {:.4} s",
            self.mse, self.psnr, self.encoding_time, self.decoding_time
        )
    }
}
