use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use tempfile::tempdir;
use trendcast_rs::data::{BarSource, CsvBarSource, load_feature_table, write_feature_table};
use trendcast_rs::evaluate::{
    MODEL_FILE, evaluate_model, load_model, save_model, train_model,
};
use trendcast_rs::{
    AnalysisError, Classifier, FEATURE_COLUMNS, FeaturePipeline, FeatureTable, ForestConfig,
};

fn sample_csv() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .join("tests")
        .join("data")
        .join("ohlcv_daily.csv")
}

fn sample_table() -> Result<FeatureTable> {
    let dir = tempdir()?;
    fs::copy(sample_csv(), dir.path().join("SAMPLE.csv"))?;
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");
    let bars = CsvBarSource::new(dir.path()).fetch("sample", start)?;
    Ok(FeaturePipeline::default().run(&bars))
}

fn quick_forest() -> ForestConfig {
    ForestConfig {
        n_trees: 15,
        ..Default::default()
    }
}

#[test]
fn sample_dataset_yields_expected_row_count() -> Result<()> {
    let table = sample_table()?;
    assert_eq!(table.len(), 160 - 50);
    assert_eq!(
        table.latest.map(|row| row.date),
        NaiveDate::from_ymd_opt(2023, 8, 11)
    );
    Ok(())
}

#[test]
fn processed_snapshot_reloads_identically() -> Result<()> {
    let table = sample_table()?;
    let dir = tempdir()?;
    let path = dir.path().join("processed_data.csv");
    write_feature_table(&path, &table)?;

    let header = fs::read_to_string(&path)?
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    let expected = format!("Date,{},Target", FEATURE_COLUMNS.join(","));
    assert_eq!(header, expected);

    let reloaded = load_feature_table(&path)?;
    assert_eq!(reloaded.len(), table.len());
    assert_eq!(reloaded.targets(), table.targets());
    assert_eq!(reloaded.latest.map(|r| r.date), table.latest.map(|r| r.date));
    for (a, b) in reloaded.rows.iter().zip(&table.rows) {
        assert_eq!(a.features.date, b.features.date);
        for (x, y) in a.features.feature_vector().iter().zip(b.features.feature_vector()) {
            assert!((x - y).abs() <= 1e-9 * y.abs().max(1.0));
        }
    }
    Ok(())
}

#[test]
fn saved_model_predicts_like_the_fitted_one() -> Result<()> {
    let table = sample_table()?;
    let model = train_model(&table, &quick_forest(), 0.8)?;
    let dir = tempdir()?;
    let path = dir.path().join(MODEL_FILE);
    save_model(&path, &model)?;

    let loaded = load_model(&path)?;
    let features = table.feature_matrix();
    assert_eq!(loaded.predict_proba(&features), model.predict_proba(&features));

    let score = evaluate_model(&loaded, &table, 0.8)?;
    assert!((0.0..=1.0).contains(&score));
    Ok(())
}

#[test]
fn model_with_foreign_column_order_is_rejected() -> Result<()> {
    let table = sample_table()?;
    let model = train_model(&table, &quick_forest(), 0.8)?;
    let dir = tempdir()?;
    let path = dir.path().join(MODEL_FILE);
    save_model(&path, &model)?;

    let json = fs::read_to_string(&path)?;
    let tampered = json.replacen(r#""Open","High""#, r#""High","Open""#, 1);
    assert_ne!(json, tampered);
    fs::write(&path, tampered)?;

    let err = load_model(&path).unwrap_err();
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::FeatureContract { expected, found }) => {
            assert_eq!(expected[0], "Open");
            assert_eq!(found[0], "High");
        }
        other => panic!("expected feature contract error, got {other:?}"),
    }
    Ok(())
}
