//! Reconstruction losses. The autoencoder is trained on the mean squared error,
//! the mean absolute error is reported alongside.
use crate::{Batch, ModelError, ModelResult};

fn check_shapes(output: &Batch, target: &Batch) -> ModelResult<()> {
    if output.shape() != target.shape() {
        return Err(ModelError::ShapeMismatch {
            expected: target.shape().to_vec(),
            found: output.shape().to_vec(),
        });
    }
    Ok(())
}

/// Mean squared error over all elements
pub fn mse(output: &Batch, target: &Batch) -> ModelResult<f32> {
    check_shapes(output, target)?;
    let len = output.len().max(1) as f32;
    Ok((output - target).mapv(|a| a.powi(2)).sum() / len)
}

/// Mean absolute error over all elements
pub fn mae(output: &Batch, target: &Batch) -> ModelResult<f32> {
    check_shapes(output, target)?;
    let len = output.len().max(1) as f32;
    Ok((output - target).mapv(f32::abs).sum() / len)
}

/// Derivative of `mse` with respect to the output
pub fn mse_gradient(output: &Batch, target: &Batch) -> ModelResult<Batch> {
    check_shapes(output, target)?;
    let len = output.len().max(1) as f32;
    Ok((output - target) * (2.0 / len))
}

/// Peak signal to noise ratio in dB for the given mean squared error.
/// Signals with values in [0, 1] have a `max_value` of 1.
pub fn psnr(mse: f64, max_value: f64) -> f64 {
    10.0 * (max_value.powi(2) / mse).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::*;

    fn batch(values: Vec<f32>) -> Batch {
        Array::from_shape_vec((1, 1, 1, values.len()), values).unwrap()
    }

    #[test]
    fn mse_test() {
        let orig = batch(vec![0., 1., 0., 1.]);
        let rec = batch(vec![0., 1., 0., 0.]);
        assert_eq!(mse(&orig, &rec).unwrap(), 0.25);
        assert_eq!(mse(&rec, &orig).unwrap(), 0.25);

        let rec2 = batch(vec![0., 1., 2., 1.]);
        assert_eq!(mse(&orig, &rec2).unwrap(), 1.0);
    }

    #[test]
    fn mae_test() {
        let orig = batch(vec![0., 1., 0., 1.]);
        let rec = batch(vec![0.5, 1., 0., -1.]);
        assert_eq!(mae(&orig, &rec).unwrap(), 0.625);
    }

    #[test]
    fn mse_gradient_test() {
        let out = batch(vec![1., 0.]);
        let target = batch(vec![0., 0.]);
        assert_eq!(mse_gradient(&out, &target).unwrap(), batch(vec![1., 0.]));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = batch(vec![1., 0.]);
        let b = batch(vec![1., 0., 0.]);
        assert!(matches!(
            mse(&a, &b),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn snr_test() {
        assert_eq!(psnr(1.0, 255.0), 10. * 255f64.powi(2).log10());
        assert!((psnr(0.01, 1.0) - 20.0).abs() < 1e-9);
        assert!(psnr(0.0, 1.0).is_infinite());
    }
}
