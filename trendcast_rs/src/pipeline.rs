use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bars::{Bar, BarSeries};
use crate::indicators::{FlatRsiPolicy, IndicatorSet, MA_LONG_WINDOW};
use crate::labels::next_day_targets;

/// Ordered feature contract shared by training, evaluation, backtests and
/// live prediction. A classifier only accepts vectors in exactly this order.
pub const FEATURE_COLUMNS: [&str; 11] = [
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Return",
    "MA10",
    "MA50",
    "EMA20",
    "Volatility",
    "RSI",
];

pub const FEATURE_COUNT: usize = FEATURE_COLUMNS.len();

pub const DATE_COLUMN: &str = "Date";
pub const TARGET_COLUMN: &str = "Target";

/// Rows needed before the longest indicator window is defined.
pub const MIN_FEATURE_ROWS: usize = MA_LONG_WINDOW;
/// Rows needed for at least one labelled row.
pub const MIN_LABELED_ROWS: usize = MA_LONG_WINDOW + 1;

pub type FeatureVector = [f64; FEATURE_COUNT];

pub fn feature_names() -> Vec<String> {
    FEATURE_COLUMNS.iter().map(|name| name.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ret: f64,
    pub ma10: f64,
    pub ma50: f64,
    pub ema20: f64,
    pub volatility: f64,
    pub rsi: f64,
}

impl FeatureRow {
    pub fn from_parts(bar: &Bar, indicators: &IndicatorSet, index: usize) -> Self {
        Self {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            ret: indicators.ret[index],
            ma10: indicators.ma10[index],
            ma50: indicators.ma50[index],
            ema20: indicators.ema20[index],
            volatility: indicators.volatility[index],
            rsi: indicators.rsi[index],
        }
    }

    /// Values in `FEATURE_COLUMNS` order.
    pub fn feature_vector(&self) -> FeatureVector {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.ret,
            self.ma10,
            self.ma50,
            self.ema20,
            self.volatility,
            self.rsi,
        ]
    }

    pub fn from_feature_vector(date: NaiveDate, values: &FeatureVector) -> Self {
        let [open, high, low, close, volume, ret, ma10, ma50, ema20, volatility, rsi] = *values;
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            ret,
            ma10,
            ma50,
            ema20,
            volatility,
            rsi,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.feature_vector().iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub features: FeatureRow,
    pub target: u8,
}

/// Model-ready rows plus the newest unlabeled row for live prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub rows: Vec<LabeledRow>,
    pub latest: Option<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_matrix(&self) -> Vec<FeatureVector> {
        self.rows
            .iter()
            .map(|row| row.features.feature_vector())
            .collect()
    }

    pub fn targets(&self) -> Vec<u8> {
        self.rows.iter().map(|row| row.target).collect()
    }

    pub fn returns(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.features.ret).collect()
    }

    /// Labelled rows followed by `latest` when it is newer than all of them.
    /// This is the table shown in reports and exported as CSV.
    pub fn display_rows(&self) -> Vec<(FeatureRow, Option<u8>)> {
        let mut out: Vec<(FeatureRow, Option<u8>)> = self
            .rows
            .iter()
            .map(|row| (row.features, Some(row.target)))
            .collect();
        if let Some(latest) = self.latest {
            let newer = self
                .rows
                .last()
                .is_none_or(|last| latest.date > last.features.date);
            if newer {
                out.push((latest, None));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeaturePipeline {
    rsi_policy: FlatRsiPolicy,
}

impl FeaturePipeline {
    pub fn new(rsi_policy: FlatRsiPolicy) -> Self {
        Self { rsi_policy }
    }

    /// Compute indicators and targets, then keep only rows where every value
    /// is defined. Short or empty input gives an empty table.
    pub fn run(&self, series: &BarSeries) -> FeatureTable {
        let bars = series.bars();
        if bars.is_empty() {
            debug!("empty bar series; no features to compute");
            return FeatureTable::default();
        }

        let indicators = IndicatorSet::compute(series, self.rsi_policy);
        let targets = next_day_targets(&series.closes());

        let mut rows = Vec::with_capacity(bars.len().saturating_sub(MIN_LABELED_ROWS - 1));
        let mut latest = None;
        for (index, bar) in bars.iter().enumerate() {
            let row = FeatureRow::from_parts(bar, &indicators, index);
            if !row.is_complete() {
                continue;
            }
            latest = Some(row);
            if let Some(target) = targets[index] {
                rows.push(LabeledRow {
                    features: row,
                    target,
                });
            }
        }

        info!(
            bars = bars.len(),
            labeled_rows = rows.len(),
            has_latest = latest.is_some(),
            "Feature pipeline finished"
        );
        FeatureTable { rows, latest }
    }
}
