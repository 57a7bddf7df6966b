//! Text analysis report: headline performance, stored model accuracy, the
//! latest prediction and a CSV export of the analysed rows.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::data::{BarSource, write_feature_csv};
use crate::error::AnalysisError;
use crate::evaluate::load_accuracy;
use crate::model::Classifier;
use crate::pipeline::{FeaturePipeline, FeatureRow, MIN_FEATURE_ROWS};
use crate::predict::{Prediction, predict_latest};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub rows: usize,
    /// Percent change from the first to the last close.
    pub total_return_pct: f64,
    /// Sample standard deviation of daily returns, in percent.
    pub volatility_pct: f64,
}

impl PerformanceSummary {
    pub fn from_rows(rows: &[FeatureRow]) -> Option<Self> {
        let first = rows.first()?;
        let last = rows.last()?;
        let total_return_pct = (last.close / first.close - 1.0) * 100.0;

        let n = rows.len();
        let volatility_pct = if n < 2 {
            f64::NAN
        } else {
            let mean = rows.iter().map(|r| r.ret).sum::<f64>() / n as f64;
            let variance =
                rows.iter().map(|r| (r.ret - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            variance.sqrt() * 100.0
        };

        Some(Self {
            first_date: first.date,
            last_date: last.date,
            rows: n,
            total_return_pct,
            volatility_pct,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub ticker: String,
    pub summary: PerformanceSummary,
    /// Stored hold-out accuracy, when an accuracy artifact exists.
    pub accuracy: Option<f64>,
    pub prediction: PredictionOutcome,
    pub export_path: Option<PathBuf>,
}

/// Prediction section of a report. Without a classifier the rest of the
/// report is still built.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Ready(Prediction),
    Unavailable,
}

impl PredictionOutcome {
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            PredictionOutcome::Ready(prediction) => Some(prediction),
            PredictionOutcome::Unavailable => None,
        }
    }
}

impl fmt::Display for PredictionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionOutcome::Ready(prediction) => write!(f, "{prediction}"),
            PredictionOutcome::Unavailable => f.write_str("Prediction unavailable: model not found"),
        }
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = &self.summary;
        writeln!(
            f,
            "{} | {} .. {} | {} rows",
            self.ticker, summary.first_date, summary.last_date, summary.rows
        )?;
        writeln!(f, "Total Return: {:.2}%", summary.total_return_pct)?;
        writeln!(f, "Volatility: {:.2}%", summary.volatility_pct)?;
        match self.accuracy {
            Some(accuracy) => writeln!(f, "Model Accuracy: {:.2}%", accuracy * 100.0)?,
            None => writeln!(f, "Model Accuracy: unavailable")?,
        }
        write!(f, "{}", self.prediction)?;
        if let Some(path) = &self.export_path {
            write!(f, "\nExported: {}", path.display())?;
        }
        Ok(())
    }
}

/// Inputs the analysis flow needs beyond the bar source.
pub struct AnalysisRequest<'a> {
    pub ticker: &'a str,
    pub start: NaiveDate,
    pub pipeline: FeaturePipeline,
    pub confidence_threshold: f64,
    /// Directory receiving `<TICKER>_stock_data.csv`; `None` skips the export.
    pub export_dir: Option<&'a Path>,
}

pub fn export_file_name(ticker: &str) -> String {
    format!("{}_stock_data.csv", ticker.to_uppercase())
}

/// Stored accuracy, or `None` with a warning when the artifact is absent.
pub fn stored_accuracy(path: &Path) -> Result<Option<f64>> {
    match load_accuracy(path) {
        Ok(value) => Ok(Some(value)),
        Err(err) => match err.downcast_ref::<AnalysisError>() {
            Some(AnalysisError::MissingArtifact { .. }) => {
                warn!(path = %path.display(), "Model accuracy unavailable");
                Ok(None)
            }
            _ => Err(err),
        },
    }
}

/// Fetch, featurise, score the newest row and optionally export.
///
/// The classifier and accuracy are supplied by the caller; nothing here
/// reads model artifacts. Data problems halt before any scoring. A missing
/// classifier only leaves the prediction section unavailable.
pub fn run_analysis(
    source: &dyn BarSource,
    classifier: Option<&dyn Classifier>,
    accuracy: Option<f64>,
    request: &AnalysisRequest<'_>,
) -> Result<AnalysisReport> {
    let ticker = request.ticker.to_uppercase();
    let bars = source.fetch(&ticker, request.start)?;
    if bars.is_empty() {
        return Err(AnalysisError::DataUnavailable { ticker }.into());
    }

    let table = request.pipeline.run(&bars);
    let display = table.display_rows();
    let rows: Vec<FeatureRow> = display.iter().map(|(row, _)| *row).collect();
    let (Some(summary), Some(latest)) = (PerformanceSummary::from_rows(&rows), table.latest)
    else {
        return Err(AnalysisError::InsufficientHistory {
            rows: bars.len(),
            required: MIN_FEATURE_ROWS,
        }
        .into());
    };

    let export_path = match request.export_dir {
        Some(dir) => {
            let path = dir.join(export_file_name(&ticker));
            write_feature_csv(&path, &display)?;
            Some(path)
        }
        None => None,
    };

    let prediction = match classifier {
        Some(classifier) => PredictionOutcome::Ready(predict_latest(
            classifier,
            &latest,
            request.confidence_threshold,
        )?),
        None => {
            warn!(ticker = %ticker, "No classifier supplied; prediction skipped");
            PredictionOutcome::Unavailable
        }
    };

    info!(
        ticker = %ticker,
        rows = summary.rows,
        total_return_pct = summary.total_return_pct,
        prediction = %prediction,
        "Analysis complete"
    );
    Ok(AnalysisReport {
        ticker,
        summary,
        accuracy,
        prediction,
        export_path,
    })
}
