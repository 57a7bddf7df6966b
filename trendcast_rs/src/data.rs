use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{info, warn};

use crate::bars::{Bar, BarSeries};
use crate::error::AnalysisError;
use crate::pipeline::{
    DATE_COLUMN, FEATURE_COLUMNS, FEATURE_COUNT, FeatureRow, FeatureTable, FeatureVector,
    LabeledRow, TARGET_COLUMN,
};

const DATE_ALIASES: &[&str] = &["Date", "Datetime", "timestamp"];
const PRICE_COLUMNS: [&str; 4] = ["Open", "High", "Low", "Close"];
const VOLUME_COLUMN: &str = "Volume";

pub const RAW_SNAPSHOT_FILE: &str = "stock_data.csv";
pub const PROCESSED_FILE: &str = "processed_data.csv";

/// Provider of daily bars for a ticker.
pub trait BarSource {
    fn fetch(&self, ticker: &str, start: NaiveDate) -> Result<BarSeries>;
}

/// Reads `<data_dir>/<TICKER>.csv` snapshots.
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    data_dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", ticker.to_uppercase()))
    }
}

impl BarSource for CsvBarSource {
    fn fetch(&self, ticker: &str, start: NaiveDate) -> Result<BarSeries> {
        let ticker = ticker.to_uppercase();
        let path = self.path_for(&ticker);
        if !path.exists() {
            return Err(AnalysisError::DataUnavailable { ticker }.into());
        }
        let series = load_bars(&path)?.since(start);
        if series.is_empty() {
            return Err(AnalysisError::DataUnavailable { ticker }.into());
        }
        info!(
            ticker = %ticker,
            bars = series.len(),
            start = %start,
            path = %path.display(),
            "Loaded bars"
        );
        Ok(series)
    }
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    CsvReader::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .infer_schema(Some(1024))
        .has_header(true)
        .with_ignore_errors(true)
        .finish()
        .with_context(|| format!("Unable to read {} into DataFrame", path.display()))
}

fn find_column<'a>(frame: &'a DataFrame, name: &str) -> Option<&'a Series> {
    frame
        .get_columns()
        .iter()
        .find(|series| series.name().eq_ignore_ascii_case(name))
}

fn required_column<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a Series> {
    find_column(frame, name).ok_or_else(|| anyhow!("Missing required column {name}"))
}

/// Numeric view of a column; cells that do not parse become NaN.
fn column_with_nans(series: &Series) -> Result<Vec<f64>> {
    let cast = series
        .cast(&DataType::Float64)
        .with_context(|| format!("Column {} must be numeric", series.name()))?;
    Ok(cast
        .f64()
        .with_context(|| format!("Column {} must be float", series.name()))?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

fn date_column(series: &Series) -> Result<Vec<Option<NaiveDate>>> {
    let cast = series
        .cast(&DataType::String)
        .with_context(|| format!("Column {} must be convertible to text", series.name()))?;
    Ok(cast
        .str()
        .with_context(|| format!("Column {} must be text", series.name()))?
        .into_iter()
        .map(|value| value.and_then(parse_date))
        .collect())
}

/// Accepts `YYYY-MM-DD` optionally followed by a time and offset.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Load raw daily bars from CSV.
///
/// Column names are matched case-insensitively. A missing Volume column
/// defaults to zero; non-numeric cells become NaN. Rows whose date does not
/// parse (multi-line headers from some exporters) are skipped.
pub fn load_bars(path: &Path) -> Result<BarSeries> {
    let frame = read_csv(path)?;
    if frame.height() == 0 {
        return Ok(BarSeries::default());
    }

    let date_series = DATE_ALIASES
        .iter()
        .find_map(|name| find_column(&frame, name))
        .ok_or_else(|| anyhow!("Missing required date column in {}", path.display()))?;
    let dates = date_column(date_series)?;

    let [open, high, low, close] = [
        column_with_nans(required_column(&frame, PRICE_COLUMNS[0])?)?,
        column_with_nans(required_column(&frame, PRICE_COLUMNS[1])?)?,
        column_with_nans(required_column(&frame, PRICE_COLUMNS[2])?)?,
        column_with_nans(required_column(&frame, PRICE_COLUMNS[3])?)?,
    ];
    let volume = match find_column(&frame, VOLUME_COLUMN) {
        Some(series) => column_with_nans(series)?,
        None => vec![0.0; frame.height()],
    };

    let mut bars = Vec::with_capacity(frame.height());
    let mut skipped = 0usize;
    for (i, date) in dates.iter().enumerate() {
        let Some(date) = *date else {
            skipped += 1;
            continue;
        };
        bars.push(Bar {
            date,
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            volume: volume[i],
        });
    }
    if skipped > 0 {
        warn!(
            skipped,
            path = %path.display(),
            "Skipping rows without a parseable date"
        );
    }

    BarSeries::new(bars)
        .with_context(|| format!("Bars in {} are not in chronological order", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create {}", parent.display()))?;
    }
    Ok(())
}

fn write_frame(path: &Path, frame: &mut DataFrame) -> Result<()> {
    ensure_parent(path)?;
    let mut file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(frame)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn date_strings<'a>(dates: impl Iterator<Item = &'a NaiveDate>) -> Vec<String> {
    dates.map(|date| date.format("%Y-%m-%d").to_string()).collect()
}

/// Raw snapshot: `Date,Open,High,Low,Close,Volume`.
pub fn write_bars_csv(path: &Path, series: &BarSeries) -> Result<()> {
    let bars = series.bars();
    let mut frame = DataFrame::new(vec![
        Series::new(DATE_COLUMN, date_strings(bars.iter().map(|b| &b.date))),
        Series::new("Open", bars.iter().map(|b| b.open).collect::<Vec<_>>()),
        Series::new("High", bars.iter().map(|b| b.high).collect::<Vec<_>>()),
        Series::new("Low", bars.iter().map(|b| b.low).collect::<Vec<_>>()),
        Series::new("Close", bars.iter().map(|b| b.close).collect::<Vec<_>>()),
        Series::new(VOLUME_COLUMN, bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
    ])
    .context("Failed to assemble raw bar frame")?;
    write_frame(path, &mut frame)?;
    info!(rows = bars.len(), path = %path.display(), "Raw bar snapshot written");
    Ok(())
}

/// Engineered snapshot: `Date`, the feature contract columns, then `Target`.
/// Rows without a target (the live row) leave `Target` empty.
pub fn write_feature_csv(path: &Path, rows: &[(FeatureRow, Option<u8>)]) -> Result<()> {
    let mut columns = Vec::with_capacity(FEATURE_COUNT + 2);
    columns.push(Series::new(
        DATE_COLUMN,
        date_strings(rows.iter().map(|(row, _)| &row.date)),
    ));
    let vectors: Vec<FeatureVector> = rows.iter().map(|(row, _)| row.feature_vector()).collect();
    for (idx, name) in FEATURE_COLUMNS.iter().enumerate() {
        let values: Vec<f64> = vectors.iter().map(|vector| vector[idx]).collect();
        columns.push(Series::new(name, values));
    }
    let targets: Vec<Option<i64>> = rows
        .iter()
        .map(|(_, target)| target.map(i64::from))
        .collect();
    columns.push(Series::new(TARGET_COLUMN, targets));

    let mut frame = DataFrame::new(columns).context("Failed to assemble feature frame")?;
    write_frame(path, &mut frame)?;
    info!(rows = rows.len(), path = %path.display(), "Processed feature snapshot written");
    Ok(())
}

pub fn write_feature_table(path: &Path, table: &FeatureTable) -> Result<()> {
    write_feature_csv(path, &table.display_rows())
}

/// Read an engineered snapshot back into a feature table.
///
/// Rows with a target become labelled rows; the newest complete row without
/// one becomes `latest`. Incomplete rows are dropped with a warning.
pub fn load_feature_table(path: &Path) -> Result<FeatureTable> {
    let frame = read_csv(path)?;
    if frame.height() == 0 {
        return Ok(FeatureTable::default());
    }

    let dates = date_column(required_column(&frame, DATE_COLUMN)?)?;
    let mut feature_columns = Vec::with_capacity(FEATURE_COUNT);
    for name in FEATURE_COLUMNS {
        feature_columns.push(column_with_nans(required_column(&frame, name)?)?);
    }
    let targets = column_with_nans(required_column(&frame, TARGET_COLUMN)?)?;

    let mut table = FeatureTable::default();
    let mut dropped = 0usize;
    for (i, date) in dates.iter().enumerate() {
        let Some(date) = *date else {
            dropped += 1;
            continue;
        };
        let mut vector = [f64::NAN; FEATURE_COUNT];
        for (slot, column) in vector.iter_mut().zip(feature_columns.iter()) {
            *slot = column[i];
        }
        let row = FeatureRow::from_feature_vector(date, &vector);
        if !row.is_complete() {
            dropped += 1;
            continue;
        }
        let target = targets[i];
        if target.is_finite() {
            table.rows.push(LabeledRow {
                features: row,
                target: u8::from(target > 0.5),
            });
        }
        table.latest = Some(row);
    }

    if dropped > 0 {
        warn!(dropped, path = %path.display(), "Dropped incomplete feature rows");
    }
    info!(
        rows = table.len(),
        path = %path.display(),
        "Loaded processed feature snapshot"
    );
    Ok(table)
}
