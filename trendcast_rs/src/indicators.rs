//! Per-row technical indicators over a daily close series.
//!
//! Every function returns a vector aligned with its input. Rows without
//! enough history (or with an undefined input inside their window) are
//! `f64::NAN`; the feature pipeline drops them in a single pass later.

use serde::{Deserialize, Serialize};

use crate::bars::BarSeries;

pub const MA_SHORT_WINDOW: usize = 10;
pub const MA_LONG_WINDOW: usize = 50;
pub const EMA_SPAN: usize = 20;
pub const VOLATILITY_WINDOW: usize = 10;
pub const RSI_PERIOD: usize = 14;

/// What RSI reports when a window has neither gains nor losses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatRsiPolicy {
    /// Leave RSI undefined so the row is dropped.
    #[default]
    Undefined,
    /// Report the midpoint, 50.
    Neutral,
}

const NEUTRAL_RSI: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub ret: Vec<f64>,
    pub ma10: Vec<f64>,
    pub ma50: Vec<f64>,
    pub ema20: Vec<f64>,
    pub volatility: Vec<f64>,
    pub rsi: Vec<f64>,
}

impl IndicatorSet {
    pub fn compute(series: &BarSeries, policy: FlatRsiPolicy) -> Self {
        let close = series.closes();
        let ret = pct_change(&close);
        Self {
            ma10: rolling_mean(&close, MA_SHORT_WINDOW),
            ma50: rolling_mean(&close, MA_LONG_WINDOW),
            ema20: ema_seeded(&close, EMA_SPAN),
            volatility: rolling_std(&ret, VOLATILITY_WINDOW),
            rsi: rsi(&close, RSI_PERIOD, policy),
            ret,
        }
    }

    pub fn len(&self) -> usize {
        self.ret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ret.is_empty()
    }
}

pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = (values[i] - values[i - 1]) / values[i - 1];
    }
    out
}

/// Trailing mean over exactly `window` rows, inclusive of the current one.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let len = values.len();
    let mut out = vec![f64::NAN; len];
    if window == 0 || window > len {
        return out;
    }
    // Each window is summed directly so an all-zero window is exactly zero.
    for i in window - 1..len {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| !v.is_finite()) {
            continue;
        }
        out[i] = slice.iter().sum::<f64>() / window as f64;
    }
    out
}

/// Recursive EMA with `alpha = 2/(span+1)`, seeded with the first value.
pub fn ema_seeded(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &value in &values[1..] {
        prev = alpha * value + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Trailing sample standard deviation (n - 1 denominator).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 {
        return vec![f64::NAN; values.len()];
    }
    if window == 1 {
        return vec![0.0; values.len()];
    }
    let mean = rolling_mean(values, window);
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                return f64::NAN;
            }
            let mean_val = mean[i];
            if !mean_val.is_finite() {
                return f64::NAN;
            }
            let slice = &values[i + 1 - window..=i];
            let variance_sum = slice.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>();
            (variance_sum / (window - 1) as f64).sqrt()
        })
        .collect()
}

/// Simple-average RSI: gains and losses are averaged over a trailing window.
pub fn rsi(close: &[f64], period: usize, policy: FlatRsiPolicy) -> Vec<f64> {
    let len = close.len();
    let mut gains = vec![f64::NAN; len];
    let mut losses = vec![f64::NAN; len];
    for i in 1..len {
        let change = close[i] - close[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);
    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(&gain, &loss)| rsi_from_averages(gain, loss, policy))
        .collect()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64, policy: FlatRsiPolicy) -> f64 {
    if !avg_gain.is_finite() || !avg_loss.is_finite() {
        return f64::NAN;
    }
    if avg_loss == 0.0 {
        if avg_gain > 0.0 {
            return 100.0;
        }
        return match policy {
            FlatRsiPolicy::Neutral => NEUTRAL_RSI,
            FlatRsiPolicy::Undefined => f64::NAN,
        };
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}
