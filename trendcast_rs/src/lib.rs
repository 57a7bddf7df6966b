pub mod backtest;
pub mod bars;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod indicators;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod report;

pub use backtest::{ThresholdReport, run_threshold_backtest};
pub use bars::{Bar, BarSeries};
pub use config::Config;
pub use data::{BarSource, CsvBarSource};
pub use error::AnalysisError;
pub use indicators::FlatRsiPolicy;
pub use model::{Classifier, ForestConfig, RandomForestClassifier};
pub use pipeline::{FEATURE_COLUMNS, FeaturePipeline, FeatureRow, FeatureTable};
pub use predict::{Prediction, Verdict, predict_latest};
pub use report::{AnalysisReport, PerformanceSummary};
