//! Training history and evaluation results, with their textual and graphical reports.
use crate::{ModelError, ModelResult};
use plotters::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

const LOSS_COLOUR: RGBColor = RGBColor(31, 119, 180);
const VAL_LOSS_COLOUR: RGBColor = RGBColor(255, 127, 14);
const CHART_BG_COLOUR: RGBAColor = RGBAColor(234, 234, 242, 1.0);
const LINE_STROKE_WIDTH: u32 = 2;
const MARGIN: i32 = 20;
const IMG_DIMS: (u32, u32) = (800, 600);

/// Metrics of a single epoch. Validation metrics are only present when
/// training was given a validation source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub loss: f32,
    pub mae: f32,
    pub val_loss: Option<f32>,
    pub val_mae: Option<f32>,
}

impl EpochStats {
    /// JSON has no NaN or infinity, only finite stats can be saved.
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite()
            && self.mae.is_finite()
            && self.val_loss.map_or(true, f32::is_finite)
            && self.val_mae.map_or(true, f32::is_finite)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stats: EpochStats) {
        self.epochs.push(stats);
    }

    /// Appends the epochs of a later training run
    pub fn extend(&mut self, other: TrainingHistory) {
        self.epochs.extend(other.epochs);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.epochs.iter().all(EpochStats::is_finite)
    }

    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }

    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    /// (epoch, validation loss) for every epoch that was validated
    pub fn val_losses(&self) -> Vec<(usize, f32)> {
        self.epochs
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.val_loss.map(|v| (i, v)))
            .collect()
    }

    /// Draws loss (blue) and validation loss (orange) per epoch into a PNG file.
    pub fn plot<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        if self.is_empty() {
            return Err(ModelError::Plot("the training history is empty".to_string()));
        }
        let losses = self.losses();
        let val_losses = self.val_losses();

        let all_values = losses
            .iter()
            .copied()
            .chain(val_losses.iter().map(|(_, v)| *v))
            .map(f64::from);
        let y_min = all_values.clone().fold(f64::INFINITY, f64::min);
        let mut y_max = all_values.fold(f64::NEG_INFINITY, f64::max);
        if y_max - y_min < f64::EPSILON {
            y_max = y_min + 1.0;
        }
        let x_max = (self.len().max(2) - 1) as f64;

        let root = BitMapBackend::new(path.as_ref(), IMG_DIMS).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(MARGIN)
            .build_cartesian_2d(0f64..x_max, y_min..y_max)
            .map_err(plot_error)?;
        chart
            .plotting_area()
            .fill(&CHART_BG_COLOUR)
            .map_err(plot_error)?;

        chart
            .draw_series(LineSeries::new(
                losses.iter().enumerate().map(|(i, &l)| (i as f64, l as f64)),
                ShapeStyle::from(&LOSS_COLOUR).stroke_width(LINE_STROKE_WIDTH),
            ))
            .map_err(plot_error)?;
        if !val_losses.is_empty() {
            chart
                .draw_series(LineSeries::new(
                    val_losses.iter().map(|&(i, l)| (i as f64, l as f64)),
                    ShapeStyle::from(&VAL_LOSS_COLOUR).stroke_width(LINE_STROKE_WIDTH),
                ))
                .map_err(plot_error)?;
        }

        root.present().map_err(plot_error)?;
        Ok(())
    }
}

fn plot_error<E: Display>(e: E) -> ModelError {
    ModelError::Plot(e.to_string())
}

fn format_optional(value: Option<f32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.6}", v))
}

impl Display for TrainingHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>6} {:>12} {:>12} {:>12} {:>12}",
            "epoch", "loss", "mae", "val_loss", "val_mae"
        )?;
        for (i, e) in self.epochs.iter().enumerate() {
            writeln!(
                f,
                "{:>6} {:>12.6} {:>12.6} {:>12} {:>12}",
                i + 1,
                e.loss,
                e.mae,
                format_optional(e.val_loss),
                format_optional(e.val_mae)
            )?;
        }
        Ok(())
    }
}

/// Result of evaluating a model on a data source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Mean squared error
    pub loss: f32,
    /// Mean absolute error
    pub mae: f32,
}

impl Evaluation {
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.mae.is_finite()
    }
}

impl Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Loss (MSE): {:.6}\nMAE: {:.6}", self.loss, self.mae)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn history() -> TrainingHistory {
        let mut history = TrainingHistory::new();
        history.push(EpochStats {
            loss: 0.5,
            mae: 0.4,
            val_loss: Some(0.6),
            val_mae: Some(0.5),
        });
        history.push(EpochStats {
            loss: 0.25,
            mae: 0.2,
            val_loss: None,
            val_mae: None,
        });
        history
    }

    #[test]
    fn test_losses() {
        let history = history();
        assert_eq!(history.losses(), vec![0.5, 0.25]);
        assert_eq!(history.val_losses(), vec![(0, 0.6)]);
        assert_eq!(history.last().unwrap().loss, 0.25);
    }

    #[test]
    fn test_extend() {
        let mut first = history();
        first.extend(history());
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_display() {
        let table = history().to_string();
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("val_loss"));
        assert!(lines[2].trim_end().ends_with('-'));

        let evaluation = Evaluation {
            loss: 0.125,
            mae: 0.25,
        };
        assert_eq!(evaluation.to_string(), "Loss (MSE): 0.125000\nMAE: 0.250000");
    }

    #[test]
    fn test_plot_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.png");
        history().plot(&path).unwrap();
        assert!(path.exists());

        assert!(TrainingHistory::new()
            .plot(dir.path().join("empty.png"))
            .is_err());
        dir.close().unwrap();
    }

    #[test]
    fn test_non_finite_stats() {
        let mut history = history();
        assert!(history.is_finite());
        history.push(EpochStats {
            loss: 0.1,
            mae: 0.1,
            val_loss: Some(f32::NAN),
            val_mae: Some(0.1),
        });
        assert!(!history.is_finite());
        assert!(!Evaluation {
            loss: f32::INFINITY,
            mae: 0.
        }
        .is_finite());
    }

    #[test]
    fn test_json_roundtrip() {
        let json = serde_json::to_string(&history()).unwrap();
        let restored: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, history());
    }
}
