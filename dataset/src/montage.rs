use crate::{array_to_image, to_pixel, DataError, DataResult};
use image::DynamicImage;
use ml::Batch;
use ndarray::*;
use std::path::Path;

/// Tiles the images of a batch row by row into one image. Without a column
/// count the grid is as square as possible. Unused cells stay black.
pub fn montage(batch: &Batch, columns: Option<usize>) -> DataResult<DynamicImage> {
    let (n, c, h, w) = batch.dim();
    if n == 0 {
        return Err(DataError::EmptyBatch);
    }
    let columns = columns
        .unwrap_or_else(|| (n as f64).sqrt().ceil() as usize)
        .max(1);
    let rows = (n + columns - 1) / columns;

    let mut canvas = Array3::<f32>::zeros((c, rows * h, columns * w));
    for (i, image) in batch.axis_iter(Axis(0)).enumerate() {
        let (row, col) = (i / columns, i % columns);
        canvas
            .slice_mut(s![.., row * h..(row + 1) * h, col * w..(col + 1) * w])
            .assign(&image);
    }
    array_to_image(canvas.map(to_pixel))
}

pub fn save_montage<P: AsRef<Path>>(
    batch: &Batch,
    columns: Option<usize>,
    path: P,
) -> DataResult<()> {
    let path = path.as_ref();
    montage(batch, columns)?
        .save(path)
        .map_err(|source| DataError::Image {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use tempfile::tempdir;

    fn batch(n: usize) -> Batch {
        Array::from_shape_fn((n, 3, 2, 2), |(i, _, _, _)| (i + 1) as f32 / 10.0)
    }

    #[test]
    fn test_square_grid() {
        let img = montage(&batch(5), None).unwrap();
        // 3 columns, 2 rows
        assert_eq!(img.dimensions(), (6, 4));
        let rgb = img.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [26, 26, 26]);
        assert_eq!(rgb.get_pixel(5, 1).0, [77, 77, 77]);
        assert_eq!(rgb.get_pixel(2, 3).0, [128, 128, 128]);
        assert_eq!(rgb.get_pixel(5, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_fixed_columns() {
        let img = montage(&batch(4), Some(4)).unwrap();
        assert_eq!(img.dimensions(), (8, 2));
        assert!(matches!(
            montage(&Array::zeros((0, 3, 2, 2)), None),
            Err(DataError::EmptyBatch)
        ));
    }

    #[test]
    fn test_save_montage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("montage.png");
        save_montage(&batch(3), None, &path).unwrap();
        assert_eq!(image::open(&path).unwrap().dimensions(), (4, 4));
        dir.close().unwrap();
    }
}
