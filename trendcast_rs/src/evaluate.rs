//! Chronological train/test split, fitting, hold-out accuracy and the
//! on-disk model and accuracy artifacts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::model::{Classifier, ForestConfig, RandomForestClassifier};
use crate::pipeline::{FEATURE_COLUMNS, FeatureTable, FeatureVector, LabeledRow, feature_names};

pub const MODEL_FILE: &str = "model.json";
pub const ACCURACY_FILE: &str = "model_accuracy.txt";
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// First `floor(len * train_fraction)` rows train, the remainder test.
/// Rows keep their time order; nothing is shuffled.
pub fn chronological_split(rows: &[LabeledRow], train_fraction: f64) -> (&[LabeledRow], &[LabeledRow]) {
    let fraction = train_fraction.clamp(0.0, 1.0);
    let cut = ((rows.len() as f64) * fraction).floor() as usize;
    rows.split_at(cut.min(rows.len()))
}

fn matrix(rows: &[LabeledRow]) -> (Vec<FeatureVector>, Vec<u8>) {
    rows.iter()
        .map(|row| (row.features.feature_vector(), row.target))
        .unzip()
}

/// Fit a fresh forest on the training split of `table`.
pub fn train_model(
    table: &FeatureTable,
    config: &ForestConfig,
    train_fraction: f64,
) -> Result<RandomForestClassifier> {
    let (train, _) = chronological_split(&table.rows, train_fraction);
    if train.is_empty() {
        return Err(AnalysisError::InsufficientHistory {
            rows: table.len(),
            required: 2,
        }
        .into());
    }

    let (features, labels) = matrix(train);
    let mut model = RandomForestClassifier::new(config.clone());
    model.fit(&features, &labels)?;
    info!(
        train_rows = train.len(),
        total_rows = table.len(),
        trees = model.n_trees(),
        "Model trained"
    );
    Ok(model)
}

/// Share of positions where `predicted` equals `actual`.
pub fn accuracy(predicted: &[u8], actual: &[u8]) -> Result<f64> {
    if predicted.len() != actual.len() {
        return Err(
            AnalysisError::length_mismatch("predicted", predicted.len(), "actual", actual.len())
                .into(),
        );
    }
    if actual.is_empty() {
        return Err(AnalysisError::InsufficientHistory {
            rows: 0,
            required: 1,
        }
        .into());
    }
    let hits = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    Ok(hits as f64 / actual.len() as f64)
}

/// Hold-out accuracy of `classifier` on the test split of `table`.
pub fn evaluate_model(
    classifier: &dyn Classifier,
    table: &FeatureTable,
    train_fraction: f64,
) -> Result<f64> {
    check_feature_contract(classifier.feature_names())?;
    let (train, test) = chronological_split(&table.rows, train_fraction);
    if test.is_empty() {
        return Err(AnalysisError::InsufficientHistory {
            rows: table.len(),
            required: train.len() + 1,
        }
        .into());
    }
    let (features, labels) = matrix(test);
    let predicted = classifier.predict(&features);
    let score = accuracy(&predicted, &labels)?;
    info!(test_rows = test.len(), accuracy = score, "Model evaluated");
    Ok(score)
}

/// Reject a model whose fitted column list differs from the current contract.
pub fn check_feature_contract(found: &[String]) -> Result<(), AnalysisError> {
    if found.iter().map(String::as_str).eq(FEATURE_COLUMNS.iter().copied()) {
        Ok(())
    } else {
        Err(AnalysisError::FeatureContract {
            expected: feature_names(),
            found: found.to_vec(),
        })
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

pub fn save_model(path: &Path, model: &RandomForestClassifier) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string(model).context("failed to serialize model")?;
    fs::write(path, json).with_context(|| format!("failed to write model {}", path.display()))?;
    info!(path = %path.display(), "Model saved");
    Ok(())
}

pub fn load_model(path: &Path) -> Result<RandomForestClassifier> {
    if !path.exists() {
        return Err(AnalysisError::MissingArtifact {
            kind: "model",
            path: path.to_path_buf(),
        }
        .into());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read model {}", path.display()))?;
    let model: RandomForestClassifier = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse model {}", path.display()))?;
    check_feature_contract(model.feature_names())?;
    if !model.is_fitted() {
        warn!(path = %path.display(), "loaded model has no trees");
    }
    Ok(model)
}

pub fn save_accuracy(path: &Path, accuracy: f64) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, format!("{accuracy:.4}"))
        .with_context(|| format!("failed to write accuracy {}", path.display()))?;
    info!(path = %path.display(), accuracy, "Accuracy saved");
    Ok(())
}

pub fn load_accuracy(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Err(AnalysisError::MissingArtifact {
            kind: "accuracy",
            path: path.to_path_buf(),
        }
        .into());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read accuracy {}", path.display()))?;
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("invalid accuracy value in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FeatureRow;
    use chrono::NaiveDate;

    fn labeled(n: usize) -> Vec<LabeledRow> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        (0..n)
            .map(|i| {
                let mut values = [1.0; FEATURE_COLUMNS.len()];
                values[3] = i as f64;
                LabeledRow {
                    features: FeatureRow::from_feature_vector(
                        start + chrono::Days::new(i as u64),
                        &values,
                    ),
                    target: u8::from(i % 2 == 0),
                }
            })
            .collect()
    }

    #[test]
    fn split_keeps_time_order() {
        let rows = labeled(10);
        let (train, test) = chronological_split(&rows, 0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert!(train.last().unwrap().features.date < test[0].features.date);

        let rows = labeled(7);
        let (train, test) = chronological_split(&rows, 0.8);
        assert_eq!((train.len(), test.len()), (5, 2));
    }

    #[test]
    fn accuracy_counts_matches() -> Result<()> {
        assert_eq!(accuracy(&[1, 0, 1, 1], &[1, 1, 1, 0])?, 0.5);
        assert!(accuracy(&[1], &[1, 0]).is_err());
        assert!(accuracy(&[], &[]).is_err());
        Ok(())
    }

    #[test]
    fn contract_check_rejects_reordered_columns() {
        assert!(check_feature_contract(&feature_names()).is_ok());
        let mut swapped = feature_names();
        swapped.swap(0, 1);
        assert!(matches!(
            check_feature_contract(&swapped),
            Err(AnalysisError::FeatureContract { .. })
        ));
        assert!(check_feature_contract(&swapped[..5]).is_err());
    }

    #[test]
    fn accuracy_file_is_written_with_four_decimals() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(ACCURACY_FILE);
        save_accuracy(&path, 0.537_812)?;
        assert_eq!(fs::read_to_string(&path)?, "0.5378");
        assert_eq!(load_accuracy(&path)?, 0.5378);
        Ok(())
    }

    #[test]
    fn missing_artifacts_are_reported_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_accuracy(&dir.path().join(ACCURACY_FILE)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::MissingArtifact { kind: "accuracy", .. })
        ));
        let err = load_model(&dir.path().join(MODEL_FILE)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::MissingArtifact { kind: "model", .. })
        ));
    }

    #[test]
    fn train_requires_rows() {
        let table = FeatureTable::default();
        let err = train_model(&table, &ForestConfig::default(), 0.8).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::InsufficientHistory { .. })
        ));
    }
}
