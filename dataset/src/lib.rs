//! Turns folders of images into batches for the autoencoder and batches back into images.
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, LumaA, RgbImage, RgbaImage};
use log::debug;
use ml::ImageShape;
use ndarray::Array3;
use nshare::ToNdarray3;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod filenames;
pub mod generator;
pub mod montage;
pub mod statistics;

pub use filenames::{get_filenames, split_filenames};
pub use generator::AutoGenerator;
pub use montage::{montage, save_montage};
pub use statistics::Statistics;

pub type DataResult<T> = Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Directory {} could not be read:\n {source}", .path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Image {} could not be read or written:\n {source}", .path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Image {} has {found} channels, but {expected} were expected", .path.display())]
    ChannelMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("Images with {0} channels are not supported")]
    UnsupportedChannels(usize),
    #[error("No image files to draw batches from")]
    NoFiles,
    #[error("Batch size of 0 passed")]
    ZeroBatchSize,
    #[error("Validation ratio must be in [0, 1), got {0}")]
    InvalidRatio(f64),
    #[error("Batch {index} requested, but only {available} batches available")]
    BatchOutOfRange { index: usize, available: usize },
    #[error("Cannot draw an empty batch")]
    EmptyBatch,
    #[error("Wrong data shape, expected {expected:?} but got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// Turns an array in Pytorch layout (C,H,W) into an image with C channels.
pub fn array_to_image(arr: Array3<u8>) -> DataResult<DynamicImage> {
    let (channels, height, width) = arr.dim();
    // iterating the permuted view yields the (H,W,C) order image buffers expect
    let raw: Vec<u8> = arr.view().permuted_axes([1, 2, 0]).iter().copied().collect();
    let (width, height) = (width as u32, height as u32);

    let image = match channels {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, raw)
            .map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, raw).map(DynamicImage::ImageRgba8),
        c => return Err(DataError::UnsupportedChannels(c)),
    };
    Ok(image.expect("container should have the right size for the image dimensions"))
}

/// Returns the image as (C,H,W) array scaled to [0, 1]. The image is converted to
/// `channels` channels.
pub fn image_to_ndarray(img: &DynamicImage, channels: usize) -> DataResult<Array3<f32>> {
    let raw = match channels {
        1 => img.to_luma8().into_ndarray3(),
        2 => img.to_luma_alpha8().into_ndarray3(),
        3 => img.to_rgb8().into_ndarray3(),
        4 => img.to_rgba8().into_ndarray3(),
        c => return Err(DataError::UnsupportedChannels(c)),
    };
    Ok(raw.mapv(|x| x as f32 / 255.0))
}

/// Turns output from the autoencoder into a pixel value
pub fn to_pixel(x: &f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Loads an image file as (C,H,W) array in [0, 1], resized to the given shape.
/// The number of channels has to match already.
pub fn load_image<P: AsRef<Path>>(path: P, shape: ImageShape) -> DataResult<Array3<f32>> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| DataError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let found = img.color().channel_count() as usize;
    if found != shape.channels {
        return Err(DataError::ChannelMismatch {
            path: path.to_path_buf(),
            expected: shape.channels,
            found,
        });
    }

    let target = (shape.width as u32, shape.height as u32);
    let img = if img.dimensions() != target {
        debug!(
            "Resizing {} from {:?} to {:?}",
            path.display(),
            img.dimensions(),
            target
        );
        img.resize_exact(target.0, target.1, FilterType::Triangle)
    } else {
        img
    };
    image_to_ndarray(&img, shape.channels)
}
