use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::validate_threshold;
use crate::evaluate::check_feature_contract;
use crate::model::Classifier;
use crate::pipeline::FeatureRow;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Up,
    Down,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Up => f.write_str("UP"),
            Verdict::Down => f.write_str("DOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Date of the row the prediction was made from.
    pub as_of: NaiveDate,
    pub probability_up: f64,
    pub verdict: Verdict,
    pub confidence_threshold: f64,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prediction after {}: {} (confidence {:.2})",
            self.as_of, self.verdict, self.probability_up
        )
    }
}

/// Score the newest feature row. `Up` requires the probability to exceed
/// `confidence_threshold`; equality falls to `Down`.
pub fn predict_latest(
    classifier: &dyn Classifier,
    row: &FeatureRow,
    confidence_threshold: f64,
) -> Result<Prediction> {
    validate_threshold(confidence_threshold)?;
    check_feature_contract(classifier.feature_names())?;

    let probability_up = classifier
        .predict_proba(&[row.feature_vector()])
        .first()
        .copied()
        .unwrap_or(f64::NAN);
    let verdict = if probability_up > confidence_threshold {
        Verdict::Up
    } else {
        Verdict::Down
    };

    info!(
        as_of = %row.date,
        probability_up,
        verdict = %verdict,
        "Latest row scored"
    );
    Ok(Prediction {
        as_of: row.date,
        probability_up,
        verdict,
        confidence_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::pipeline::{FEATURE_COUNT, FeatureVector, feature_names};

    /// Returns a fixed probability and records nothing.
    struct Constant {
        p: f64,
        names: Vec<String>,
    }

    impl Constant {
        fn new(p: f64) -> Self {
            Self {
                p,
                names: feature_names(),
            }
        }
    }

    impl Classifier for Constant {
        fn fit(&mut self, _: &[FeatureVector], _: &[u8]) -> Result<()> {
            Ok(())
        }

        fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64> {
            vec![self.p; features.len()]
        }

        fn feature_names(&self) -> &[String] {
            &self.names
        }
    }

    fn row() -> FeatureRow {
        let date = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        FeatureRow::from_feature_vector(date, &[1.0; FEATURE_COUNT])
    }

    #[test]
    fn verdict_requires_strictly_greater_probability() -> Result<()> {
        assert_eq!(predict_latest(&Constant::new(0.61), &row(), 0.6)?.verdict, Verdict::Up);
        assert_eq!(predict_latest(&Constant::new(0.6), &row(), 0.6)?.verdict, Verdict::Down);
        assert_eq!(predict_latest(&Constant::new(0.2), &row(), 0.6)?.verdict, Verdict::Down);
        Ok(())
    }

    #[test]
    fn display_shows_confidence_as_probability() -> Result<()> {
        let prediction = predict_latest(&Constant::new(0.7312), &row(), 0.6)?;
        assert_eq!(
            prediction.to_string(),
            "Prediction after 2024-03-08: UP (confidence 0.73)"
        );
        Ok(())
    }

    #[test]
    fn foreign_feature_order_is_rejected() {
        let mut classifier = Constant::new(0.9);
        classifier.names.reverse();
        let err = predict_latest(&classifier, &row(), 0.6).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::FeatureContract { .. })
        ));
    }
}
