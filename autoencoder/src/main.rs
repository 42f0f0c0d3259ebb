//! Command line interface to train whole sweeps of autoencoders and to report on them.

use autoencoder::{
    autobuild, autoshow, default_sweep_filters, first_test_batch, saved_model_test_batch, sweep,
    BuildConfig, SweepConfig,
};
use env_logger::Builder;
use ml::{optimizers::OptimizerKind, ImageShape, TrainingConfig};
use quicli::prelude::{CliResult, Verbosity};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

/// A filter configuration like `128,128,16`
#[derive(Debug, Clone, PartialEq)]
struct Filters(Vec<usize>);

impl FromStr for Filters {
    type Err = String;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        src.split(',')
            .map(|f| {
                f.trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid filter count {:?}: {}", f, e))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Filters)
    }
}

fn parse_optimizer(src: &str) -> Result<OptimizerKind, String> {
    match src.to_lowercase().as_str() {
        "adam" => Ok(OptimizerKind::Adam),
        "sgd" => Ok(OptimizerKind::Sgd),
        other => Err(format!("unknown optimizer {:?}, use adam or sgd", other)),
    }
}

/// Where the images are and how to train on them
#[derive(Debug, StructOpt)]
struct DataOpts {
    /// Folder with the training images, part of them is used for validation
    #[structopt(long = "train", parse(from_os_str), default_value = "DATA/AUTIMGTR")]
    train_dir: PathBuf,
    /// Folder with the test images
    #[structopt(long = "test", parse(from_os_str), default_value = "DATA/AUTIMGTS")]
    test_dir: PathBuf,
    /// Folder the models are saved to
    #[structopt(long = "models", parse(from_os_str), default_value = "DATA/MODELS")]
    model_dir: PathBuf,
    /// Extension of the image files
    #[structopt(long = "ext", default_value = "png")]
    extension: String,
    /// Images are resized to this height
    #[structopt(long = "height", default_value = "64")]
    height: usize,
    /// Images are resized to this width
    #[structopt(long = "width", default_value = "64")]
    width: usize,
    /// Number of channels of the images, they are never converted
    #[structopt(long = "channels", default_value = "3")]
    channels: usize,
    /// Share of the training images used for validation
    #[structopt(long = "val-split", default_value = "0.2")]
    val_split: f64,
    #[structopt(short = "b", long = "batch-size", default_value = "32")]
    batch_size: usize,
    #[structopt(long = "learning-rate", default_value = "0.001")]
    learning_rate: f64,
    /// adam or sgd
    #[structopt(long = "optimizer", default_value = "adam", parse(try_from_str = "parse_optimizer"))]
    optimizer: OptimizerKind,
    /// Seed of weight initialisation, file split and shuffling
    #[structopt(long = "seed", default_value = "42")]
    seed: u64,
    /// Trains models again even if they were saved before
    #[structopt(long = "retrain")]
    retrain: bool,
}

impl DataOpts {
    fn build_config(&self, filters: Vec<usize>, epochs: usize) -> BuildConfig {
        BuildConfig {
            train_dir: self.train_dir.clone(),
            test_dir: self.test_dir.clone(),
            model_dir: self.model_dir.clone(),
            extension: self.extension.clone(),
            shape: ImageShape::new(self.height, self.width, self.channels),
            filters,
            epochs,
            val_split: self.val_split,
            batch_size: self.batch_size,
            seed: self.seed,
            retrain: self.retrain,
            name: None,
            training: TrainingConfig {
                learning_rate: self.learning_rate,
                optimizer: self.optimizer,
                seed: self.seed,
            },
        }
    }
}

/// Trains, evaluates and saves one autoencoder per filter configuration
#[derive(Debug, StructOpt)]
struct SweepOpts {
    #[structopt(flatten)]
    data: DataOpts,
    /// Filter configuration, f.e. `--filters 128,128,16`. May be repeated, the
    /// default sweep is used if none is given.
    #[structopt(short = "f", long = "filters")]
    filters: Vec<Filters>,
    #[structopt(short = "e", long = "epochs", default_value = "100")]
    epochs: usize,
    /// Reports are written to a folder per model in here
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = "sweep")]
    output: PathBuf,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Trains a single small model end to end
#[derive(Debug, StructOpt)]
struct ExampleOpts {
    #[structopt(flatten)]
    data: DataOpts,
    #[structopt(short = "f", long = "filters", default_value = "16,16,16,64")]
    filters: Filters,
    #[structopt(short = "e", long = "epochs", default_value = "10")]
    epochs: usize,
    /// Name the model is saved under
    #[structopt(long = "name", default_value = "TEST")]
    name: String,
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = "example")]
    output: PathBuf,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Reports on a saved model. The image shape is taken from the model, the
/// shape flags are ignored.
#[derive(Debug, StructOpt)]
struct ShowOpts {
    /// Base path of the model, without `.json` / `.npz`
    #[structopt(parse(from_os_str))]
    model: PathBuf,
    #[structopt(flatten)]
    data: DataOpts,
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = "show")]
    output: PathBuf,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Train and inspect convolutional autoencoders on folders of images.
#[derive(Debug, StructOpt)]
#[structopt(name = "autoencoder")]
enum Autoencoder {
    #[structopt(
        name = "sweep",
        about = "Trains, evaluates and saves an autoencoder for every filter configuration, \
        then reports on each of them. Already saved models are not trained again."
    )]
    Sweep(SweepOpts),
    #[structopt(
        name = "example",
        about = "Trains a single small autoencoder for a few epochs and reports on it."
    )]
    Example(ExampleOpts),
    #[structopt(
        name = "show",
        about = "Prints summary, evaluation and reconstruction statistics of a saved model."
    )]
    Show(ShowOpts),
}

/// Trait for the subcommands of the binary
trait AutoencoderOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

impl AutoencoderOpts for SweepOpts {
    fn run(&self) -> CliResult {
        let filters = if self.filters.is_empty() {
            default_sweep_filters()
        } else {
            self.filters.iter().map(|f| f.0.clone()).collect()
        };
        let config = SweepConfig {
            build: self.data.build_config(Vec::new(), self.epochs),
            filters,
            output_dir: self.output.clone(),
        };
        for report in sweep(&config)? {
            println!("{}\n", report);
        }
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencoderOpts for ExampleOpts {
    fn run(&self) -> CliResult {
        let config = BuildConfig {
            name: Some(self.name.clone()),
            ..self.data.build_config(self.filters.0.clone(), self.epochs)
        };
        let base = autobuild(&config)?;
        let batch = first_test_batch(&config)?;
        println!("{}", autoshow(&base, &batch, &self.output)?);
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencoderOpts for ShowOpts {
    fn run(&self) -> CliResult {
        let config = self.data.build_config(Vec::new(), 0);
        let batch = saved_model_test_batch(&self.model, &config)?;
        println!("{}", autoshow(&self.model, &batch, &self.output)?);
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencoderOpts for Autoencoder {
    fn run(&self) -> CliResult {
        match self {
            Autoencoder::Sweep(c) => c.run(),
            Autoencoder::Example(c) => c.run(),
            Autoencoder::Show(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Autoencoder::Sweep(c) => c.get_verbosity(),
            Autoencoder::Example(c) => c.get_verbosity(),
            Autoencoder::Show(c) => c.get_verbosity(),
        }
    }
}

fn main() -> CliResult {
    let args = Autoencoder::from_args();
    args.setup_env_logger()?;
    args.run()
}
