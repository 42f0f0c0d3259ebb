//! Listing and splitting of image files.
use crate::{DataError, DataResult};
use log::warn;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

/// All regular files in `dir` with extension `ext`, sorted. The extension is
/// compared case-insensitively and may be given with a leading dot.
pub fn get_filenames<P: AsRef<Path>>(dir: P, ext: &str) -> DataResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let wanted = ext.trim_start_matches('.').to_lowercase();
    let read_error = |source| DataError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.to_lowercase() == wanted);
        if matches {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        warn!("No .{} files found in {}", wanted, dir.display());
    }
    Ok(files)
}

/// Shuffles the files with a seeded rng and splits off `round(n * val_ratio)` of them
/// for validation. Returns (train, validation).
pub fn split_filenames(
    files: &[PathBuf],
    val_ratio: f64,
    seed: u64,
) -> DataResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    if !(0.0..1.0).contains(&val_ratio) {
        return Err(DataError::InvalidRatio(val_ratio));
    }
    let mut shuffled = files.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

    let num_val = (files.len() as f64 * val_ratio).round() as usize;
    let train = shuffled.split_off(num_val);
    Ok((train, shuffled))
}
