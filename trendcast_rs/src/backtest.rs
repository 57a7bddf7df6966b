use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AnalysisError;

pub const DEFAULT_THRESHOLDS: [f64; 5] = [0.5, 0.55, 0.6, 0.65, 0.7];

/// Outcome of trading on one probability threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub threshold: f64,
    /// Buy-and-hold growth factor over the evaluated rows.
    pub market_growth: f64,
    /// Growth factor of holding only on days after a signal.
    pub strategy_growth: f64,
    /// Evaluated rows whose own signal is on.
    pub trades: usize,
    /// Rows that survived the undefined-value filter.
    pub rows: usize,
}

impl fmt::Display for ThresholdReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Threshold {} | Strategy: {:.2} | Trades: {}",
            self.threshold, self.strategy_growth, self.trades
        )
    }
}

pub fn validate_threshold(threshold: f64) -> Result<f64, AnalysisError> {
    if threshold.is_finite() && threshold > 0.0 && threshold < 1.0 {
        Ok(threshold)
    } else {
        Err(AnalysisError::InvalidThreshold(threshold))
    }
}

/// Evaluate a long-only rule for every threshold independently.
///
/// A signal raised on day `i-1` earns the realised return of day `i`, so the
/// first row never contributes. Rows whose return or strategy return is NaN
/// are dropped; infinite returns are kept and compound to infinity.
/// Thresholds that leave no usable rows are omitted from the result.
pub fn run_threshold_backtest(
    returns: &[f64],
    probabilities: &[f64],
    thresholds: &[f64],
) -> Result<Vec<ThresholdReport>> {
    if returns.len() != probabilities.len() {
        return Err(AnalysisError::length_mismatch(
            "returns",
            returns.len(),
            "probabilities",
            probabilities.len(),
        )
        .into());
    }
    for &threshold in thresholds {
        validate_threshold(threshold)?;
    }

    let mut reports = Vec::with_capacity(thresholds.len());
    for &threshold in thresholds {
        match evaluate_threshold(returns, probabilities, threshold) {
            Some(report) => {
                info!(
                    threshold,
                    strategy_growth = report.strategy_growth,
                    market_growth = report.market_growth,
                    trades = report.trades,
                    "Backtest threshold evaluated"
                );
                reports.push(report);
            }
            None => debug!(threshold, "no usable rows; threshold skipped"),
        }
    }
    Ok(reports)
}

fn evaluate_threshold(returns: &[f64], probabilities: &[f64], threshold: f64) -> Option<ThresholdReport> {
    let signal: Vec<u8> = probabilities
        .iter()
        .map(|&p| u8::from(p > threshold))
        .collect();

    let mut market_growth = 1.0;
    let mut strategy_growth = 1.0;
    let mut trades = 0usize;
    let mut rows = 0usize;
    for i in 1..returns.len() {
        let realised = returns[i];
        let strategy = f64::from(signal[i - 1]) * realised;
        if realised.is_nan() || strategy.is_nan() {
            continue;
        }
        market_growth *= 1.0 + realised;
        strategy_growth *= 1.0 + strategy;
        trades += usize::from(signal[i]);
        rows += 1;
    }

    (rows > 0).then_some(ThresholdReport {
        threshold,
        market_growth,
        strategy_growth,
        trades,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn compounds_lagged_signal_returns() -> Result<()> {
        let probs = [0.4, 0.7, 0.8, 0.3];
        let returns = [0.01, -0.02, 0.03, 0.01];
        let reports = run_threshold_backtest(&returns, &probs, &[0.5])?;
        assert_eq!(reports.len(), 1);
        let report = reports[0];
        assert!((report.strategy_growth - 1.0403).abs() < EPS);
        assert!((report.market_growth - 0.98 * 1.03 * 1.01).abs() < EPS);
        assert_eq!(report.trades, 2);
        assert_eq!(report.rows, 3);
        assert_eq!(
            report.to_string(),
            "Threshold 0.5 | Strategy: 1.04 | Trades: 2"
        );
        Ok(())
    }

    #[test]
    fn raising_the_threshold_never_adds_trades() -> Result<()> {
        let probs: Vec<f64> = (0..200).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        let returns: Vec<f64> = (0..200).map(|i| ((i % 7) as f64 - 3.0) / 100.0).collect();
        let reports = run_threshold_backtest(&returns, &probs, &DEFAULT_THRESHOLDS)?;
        assert_eq!(reports.len(), DEFAULT_THRESHOLDS.len());
        for pair in reports.windows(2) {
            assert!(pair[0].trades >= pair[1].trades);
        }
        Ok(())
    }

    #[test]
    fn too_few_rows_skip_every_threshold() -> Result<()> {
        assert!(run_threshold_backtest(&[0.01], &[0.9], &[0.5])?.is_empty());
        assert!(run_threshold_backtest(&[], &[], &DEFAULT_THRESHOLDS)?.is_empty());
        Ok(())
    }

    #[test]
    fn undefined_returns_are_dropped() -> Result<()> {
        let reports = run_threshold_backtest(&[0.01, f64::NAN, 0.02], &[0.9, 0.9, 0.9], &[0.5])?;
        assert_eq!(reports[0].rows, 1);
        assert!((reports[0].strategy_growth - 1.02).abs() < EPS);
        Ok(())
    }

    #[test]
    fn infinite_returns_are_kept_unless_the_product_is_undefined() -> Result<()> {
        let returns = [0.01, f64::INFINITY, 0.02];

        let reports = run_threshold_backtest(&returns, &[0.9, 0.9, 0.9], &[0.5])?;
        assert_eq!(reports[0].rows, 2);
        assert_eq!(reports[0].trades, 2);
        assert_eq!(reports[0].strategy_growth, f64::INFINITY);
        assert_eq!(reports[0].market_growth, f64::INFINITY);

        // An off signal times an infinite return is NaN, so that row goes.
        let reports = run_threshold_backtest(&returns, &[0.1, 0.9, 0.9], &[0.5])?;
        assert_eq!(reports[0].rows, 1);
        assert!((reports[0].strategy_growth - 1.02).abs() < EPS);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_lengths_and_bad_thresholds() {
        let err = run_threshold_backtest(&[0.01, 0.02], &[0.5], &[0.5]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::LengthMismatch { .. })
        ));

        let err = run_threshold_backtest(&[0.01], &[0.5], &[1.5]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::InvalidThreshold(t)) if *t == 1.5
        ));
    }
}
