//! Training and reporting on whole sweeps of autoencoders.
//!
//! `autobuild` trains, evaluates and saves one model per filter configuration,
//! `autoshow` loads a saved model and reports on it.
use dataset::{
    get_filenames, save_montage, split_filenames, AutoGenerator, DataError, Statistics,
};
use log::{info, warn};
use ml::{AutoModel, Batch, DataSource, Evaluation, ImageShape, ModelError, TrainingConfig};
use ndarray::{concatenate, Axis};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub type AutoResult<T> = Result<T, AutoError>;

#[derive(Error, Debug)]
pub enum AutoError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Report could not be written. Filesystem reported error\n {0}.")]
    Io(#[from] std::io::Error),
    #[error("Inputs and reconstructions could not be stacked: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Filter configurations of the default sweep, with their latent sizes on 64x64 images
pub fn default_sweep_filters() -> Vec<Vec<usize>> {
    vec![
        vec![128, 128, 16],  // 1024
        vec![128, 4],        // 1024
        vec![128, 8],        // 2048
        vec![128, 128, 32],  // 2048
        vec![128, 16],       // 4096
        vec![128, 128, 64],  // 4096
        vec![128, 32],       // 8192
        vec![128, 128, 128], // 8192
    ]
}

/// Everything `autobuild` needs to produce one model
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub model_dir: PathBuf,
    /// Extension of the image files, f.e. `png`
    pub extension: String,
    pub shape: ImageShape,
    pub filters: Vec<usize>,
    pub epochs: usize,
    /// Share of the training files used for validation
    pub val_split: f64,
    pub batch_size: usize,
    /// Seed of the file split and the shuffling
    pub seed: u64,
    /// Train even if the model was saved before
    pub retrain: bool,
    /// Overrides the name derived by `model_name`
    pub name: Option<String>,
    pub training: TrainingConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("DATA/AUTIMGTR"),
            test_dir: PathBuf::from("DATA/AUTIMGTS"),
            model_dir: PathBuf::from("DATA/MODELS"),
            extension: "png".to_string(),
            shape: ImageShape::new(64, 64, 3),
            filters: vec![128, 128, 16],
            epochs: 100,
            val_split: 0.2,
            batch_size: 32,
            seed: 42,
            retrain: false,
            name: None,
            training: TrainingConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Base path the model is saved under, without extension
    pub fn model_base(&self) -> PathBuf {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => model_name(self.shape, &self.filters, self.epochs),
        };
        self.model_dir.join(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Shared settings, its `filters` and `name` are replaced for every model
    pub build: BuildConfig,
    pub filters: Vec<Vec<usize>>,
    /// Every model gets a report folder named after it in here
    pub output_dir: PathBuf,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            filters: default_sweep_filters(),
            output_dir: PathBuf::from("sweep"),
        }
    }
}

/// `AUTOENCODER_<h>_<w>_<c>_<filters...>_EPOCHS<e>`
pub fn model_name(shape: ImageShape, filters: &[usize], epochs: usize) -> String {
    let mut parts = vec![
        "AUTOENCODER".to_string(),
        shape.height.to_string(),
        shape.width.to_string(),
        shape.channels.to_string(),
    ];
    parts.extend(filters.iter().map(|f| f.to_string()));
    parts.push(format!("EPOCHS{}", epochs));
    parts.join("_")
}

fn test_generator(config: &BuildConfig) -> AutoResult<AutoGenerator> {
    let files = get_filenames(&config.test_dir, &config.extension)?;
    Ok(AutoGenerator::new(
        files,
        config.shape,
        config.batch_size,
        false,
        config.seed,
    )?)
}

/// First batch of the test images, in file order
pub fn first_test_batch(config: &BuildConfig) -> AutoResult<Batch> {
    Ok(test_generator(config)?.images(0)?)
}

/// First test batch at the input shape of the model saved under `base`. The shape
/// in `config` is ignored.
pub fn saved_model_test_batch<P: AsRef<Path>>(base: P, config: &BuildConfig) -> AutoResult<Batch> {
    let model = AutoModel::load(base)?;
    first_test_batch(&BuildConfig {
        shape: model.input_shape(),
        ..config.clone()
    })
}

/// Trains, evaluates and saves the model described by `config`. Returns the base
/// path of the saved model. Models that were saved before are only retrained
/// when `config.retrain` is set.
pub fn autobuild(config: &BuildConfig) -> AutoResult<PathBuf> {
    let base = config.model_base();
    if !config.retrain && AutoModel::is_saved(&base) {
        info!("{} is already trained, skipping", base.display());
        return Ok(base);
    }
    info!("Building {}", base.display());

    let files = get_filenames(&config.train_dir, &config.extension)?;
    let (train_files, val_files) = split_filenames(&files, config.val_split, config.seed)?;
    info!(
        "{} training and {} validation images",
        train_files.len(),
        val_files.len()
    );

    let mut train = AutoGenerator::new(
        train_files,
        config.shape,
        config.batch_size,
        true,
        config.seed,
    )?;
    let validation = if val_files.is_empty() {
        warn!("No validation images, training without validation");
        None
    } else {
        Some(AutoGenerator::new(
            val_files,
            config.shape,
            config.batch_size,
            false,
            config.seed,
        )?)
    };
    let test = test_generator(config)?;

    let mut model = AutoModel::create(config.shape, &config.filters, config.training)?;
    model.fit(
        &mut train,
        validation.as_ref().map(|v| v as &dyn DataSource),
        config.epochs,
    )?;
    model.evaluate(&test)?;
    model.save(&base)?;

    Ok(base)
}

/// Everything `autoshow` found out about a model
#[derive(Debug, Clone)]
pub struct ShowReport {
    pub name: String,
    pub summary: String,
    pub evaluation: Option<Evaluation>,
    pub statistics: Statistics,
}

impl Display for ShowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", self.summary)?;
        match &self.evaluation {
            Some(evaluation) => writeln!(f, "{}", evaluation)?,
            None => writeln!(f, "Not evaluated")?,
        }
        write!(f, "{}", self.statistics)
    }
}

/// Loads the model saved under `base` and writes its structure (`model.dot`), its
/// training history (`history.png`) and a montage of `batch` above its
/// reconstruction (`reconstruction.png`) into `output_dir`.
pub fn autoshow<P, Q>(base: P, batch: &Batch, output_dir: Q) -> AutoResult<ShowReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let base = base.as_ref();
    let output_dir = output_dir.as_ref();
    let model = AutoModel::load(base)?;
    fs::create_dir_all(output_dir)?;

    model.plot(output_dir.join("model.dot"))?;
    if model.history().is_empty() {
        warn!("{} has no training history to plot", base.display());
    } else {
        model.plot_training_history(output_dir.join("history.png"))?;
    }

    let start = Instant::now();
    let features = model.encode(batch)?;
    let encoding_time = start.elapsed().as_secs_f64();
    let start = Instant::now();
    let decoded = model.decode(&features)?;
    let decoding_time = start.elapsed().as_secs_f64();

    let joint = concatenate(Axis(0), &[batch.view(), decoded.view()])?;
    save_montage(
        &joint,
        Some(batch.len_of(Axis(0))),
        output_dir.join("reconstruction.png"),
    )?;

    Ok(ShowReport {
        name: base
            .file_name()
            .map_or_else(|| base.display().to_string(), |n| n.to_string_lossy().into_owned()),
        summary: model.summary(),
        evaluation: model.evaluation().copied(),
        statistics: Statistics::new(batch, &decoded, encoding_time, decoding_time)?,
    })
}

/// Builds every model of the sweep, then reports on each of them using the first
/// test batch.
pub fn sweep(config: &SweepConfig) -> AutoResult<Vec<ShowReport>> {
    let mut bases = Vec::with_capacity(config.filters.len());
    for filters in &config.filters {
        let build = BuildConfig {
            filters: filters.clone(),
            name: None,
            ..config.build.clone()
        };
        bases.push(autobuild(&build)?);
    }

    let batch = first_test_batch(&config.build)?;
    bases
        .iter()
        .map(|base| {
            let name = base.file_name().unwrap_or_else(|| base.as_os_str());
            autoshow(base, &batch, config.output_dir.join(name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use tempfile::{tempdir, TempDir};

    fn write_images(dir: &Path, n: usize) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..n {
            let img = RgbImage::from_fn(8, 8, |x, y| {
                Rgb([(i * 30) as u8, (x * 20) as u8, (y * 20) as u8])
            });
            DynamicImage::ImageRgb8(img)
                .save(dir.join(format!("{}.png", i)))
                .unwrap();
        }
    }

    fn setup() -> (TempDir, BuildConfig) {
        let dir = tempdir().unwrap();
        write_images(&dir.path().join("train"), 5);
        write_images(&dir.path().join("test"), 3);
        let config = BuildConfig {
            train_dir: dir.path().join("train"),
            test_dir: dir.path().join("test"),
            model_dir: dir.path().join("models"),
            shape: ImageShape::new(8, 8, 3),
            filters: vec![2],
            epochs: 1,
            batch_size: 2,
            ..Default::default()
        };
        (dir, config)
    }

    #[test]
    fn test_model_name() {
        assert_eq!(
            model_name(ImageShape::new(64, 64, 3), &[128, 128, 16], 100),
            "AUTOENCODER_64_64_3_128_128_16_EPOCHS100"
        );
    }

    #[test]
    fn test_default_sweep_latent_sizes() {
        let shape = ImageShape::new(64, 64, 3);
        let sizes: Vec<usize> = default_sweep_filters()
            .iter()
            .map(|f| {
                let n = f.len() as u32;
                (64 / 2usize.pow(n)).pow(2) * f[f.len() - 1]
            })
            .collect();
        assert_eq!(sizes, vec![1024, 1024, 2048, 2048, 4096, 4096, 8192, 8192]);
        assert_eq!(
            BuildConfig::default().model_base(),
            Path::new("DATA/MODELS").join(model_name(shape, &[128, 128, 16], 100))
        );
    }

    #[test]
    fn test_autobuild_trains_and_skips() {
        let (dir, config) = setup();
        let base = autobuild(&config).unwrap();
        assert_eq!(base, dir.path().join("models/AUTOENCODER_8_8_3_2_EPOCHS1"));
        assert!(AutoModel::is_saved(&base));

        let model = AutoModel::load(&base).unwrap();
        assert_eq!(model.history().len(), 1);
        assert!(model.history().last().unwrap().val_loss.is_some());
        assert!(model.evaluation().is_some());

        // a saved model is not trained again, so its training data is not needed anymore
        fs::remove_dir_all(&config.train_dir).unwrap();
        assert_eq!(autobuild(&config).unwrap(), base);

        let retrain = BuildConfig {
            retrain: true,
            ..config
        };
        assert!(matches!(autobuild(&retrain), Err(AutoError::Data(_))));
        dir.close().unwrap();
    }

    #[test]
    fn test_named_model() {
        let (dir, config) = setup();
        let config = BuildConfig {
            name: Some("TEST".to_string()),
            val_split: 0.0,
            ..config
        };
        let base = autobuild(&config).unwrap();
        assert_eq!(base, dir.path().join("models/TEST"));
        let model = AutoModel::load(&base).unwrap();
        assert!(model.history().last().unwrap().val_loss.is_none());
        dir.close().unwrap();
    }

    #[test]
    fn test_autoshow() {
        let (dir, config) = setup();
        let base = autobuild(&config).unwrap();
        let batch = first_test_batch(&config).unwrap();
        assert_eq!(batch.dim(), (2, 3, 8, 8));

        let output = dir.path().join("report");
        let report = autoshow(&base, &batch, &output).unwrap();
        assert!(output.join("model.dot").is_file());
        assert!(output.join("history.png").is_file());
        let montage = image::open(output.join("reconstruction.png")).unwrap();
        assert_eq!(montage.to_rgb8().dimensions(), (16, 16));

        assert_eq!(report.name, "AUTOENCODER_8_8_3_2_EPOCHS1");
        assert!(report.evaluation.is_some());
        assert!(report.statistics.psnr.is_finite());
        assert!(report.to_string().contains("PSNR"));
        dir.close().unwrap();
    }

    #[test]
    fn test_test_batch_follows_saved_model() {
        let (dir, config) = setup();
        let base = autobuild(&config).unwrap();

        let other_shape = BuildConfig {
            shape: ImageShape::new(64, 64, 3),
            ..config
        };
        let batch = saved_model_test_batch(&base, &other_shape).unwrap();
        assert_eq!(batch.dim(), (2, 3, 8, 8));
        assert!(autoshow(&base, &batch, dir.path().join("report")).is_ok());

        assert!(matches!(
            saved_model_test_batch(dir.path().join("models/missing"), &other_shape),
            Err(AutoError::Model(_))
        ));
        dir.close().unwrap();
    }

    #[test]
    fn test_sweep() {
        let (dir, build) = setup();
        let config = SweepConfig {
            build,
            filters: vec![vec![2], vec![2, 3]],
            output_dir: dir.path().join("sweep"),
        };
        let reports = sweep(&config).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(dir
            .path()
            .join("sweep/AUTOENCODER_8_8_3_2_3_EPOCHS1/reconstruction.png")
            .is_file());
        dir.close().unwrap();
    }
}
