use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// One trading day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn is_complete(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Chronologically ordered bars with unique dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Result<Self, AnalysisError> {
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(AnalysisError::UnorderedSeries {
                    index: index + 1,
                    date: pair[1].date,
                });
            }
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    /// Bars dated on or after `start`.
    pub fn since(&self, start: NaiveDate) -> Self {
        Self {
            bars: self
                .bars
                .iter()
                .filter(|bar| bar.date >= start)
                .copied()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn rejects_duplicate_and_backwards_dates() {
        let err = BarSeries::new(vec![bar(2, 1.0), bar(2, 1.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::UnorderedSeries { index: 1, .. }));

        let err = BarSeries::new(vec![bar(2, 1.0), bar(3, 1.0), bar(1, 1.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::UnorderedSeries { index: 2, .. }));
    }

    #[test]
    fn since_keeps_start_date_inclusive() {
        let series = BarSeries::new(vec![bar(1, 1.0), bar(2, 2.0), bar(3, 3.0)]).unwrap();
        let trimmed = series.since(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(trimmed.closes(), vec![2.0, 3.0]);
    }
}
