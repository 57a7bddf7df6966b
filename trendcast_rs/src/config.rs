use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtest::{DEFAULT_THRESHOLDS, validate_threshold};
use crate::evaluate::{ACCURACY_FILE, DEFAULT_TRAIN_FRACTION, MODEL_FILE};
use crate::indicators::FlatRsiPolicy;
use crate::model::ForestConfig;
use crate::predict::DEFAULT_CONFIDENCE_THRESHOLD;

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default()
}

/// Run settings. Every field has a default so a TOML file only needs the
/// keys it changes; CLI flags are applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ticker: String,
    pub start_date: NaiveDate,
    /// Directory holding `<TICKER>.csv` bar snapshots.
    pub data_dir: PathBuf,
    /// Model, accuracy, processed data, exports and the log file.
    pub artifacts_dir: PathBuf,
    pub thresholds: Vec<f64>,
    pub confidence_threshold: f64,
    pub train_fraction: f64,
    pub flat_rsi: FlatRsiPolicy,
    pub forest: ForestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ticker: "AAPL".to_string(),
            start_date: default_start_date(),
            data_dir: PathBuf::from("data"),
            artifacts_dir: PathBuf::from("artifacts"),
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            train_fraction: DEFAULT_TRAIN_FRACTION,
            flat_rsi: FlatRsiPolicy::default(),
            forest: ForestConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            bail!("ticker must not be empty");
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            bail!(
                "train_fraction must lie strictly between 0 and 1 (got {})",
                self.train_fraction
            );
        }
        if self.forest.n_trees == 0 {
            bail!("forest.n_trees must be at least 1");
        }
        validate_threshold(self.confidence_threshold)?;
        for &threshold in &self.thresholds {
            validate_threshold(threshold)?;
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.artifacts_dir.join(MODEL_FILE)
    }

    pub fn accuracy_path(&self) -> PathBuf {
        self.artifacts_dir.join(ACCURACY_FILE)
    }
}
