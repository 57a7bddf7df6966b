use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use trendcast_rs::config::Config;
use trendcast_rs::data::PROCESSED_FILE;
use trendcast_rs::indicators::FlatRsiPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "trendcast",
    about = "Daily-bar indicator features, next-day direction model and threshold backtests"
)]
pub struct Cli {
    /// Optional TOML file with run settings; command-line flags override it
    #[arg(long, global = true, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Disable file logging (trendcast.log in the artifacts directory)
    #[arg(long = "no-file-log", global = true, default_value_t = false)]
    pub no_file_log: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load bars and write the raw and processed snapshots
    Prepare(PrepareArgs),
    /// Fit the classifier on the chronological training split
    Train(TrainArgs),
    /// Score the stored model on the hold-out split and save its accuracy
    Evaluate(EvaluateArgs),
    /// Compare probability thresholds on the processed table
    Backtest(BacktestArgs),
    /// Report performance, stored accuracy and the latest prediction
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Ticker symbol (upper-cased before lookup)
    #[arg(long)]
    pub ticker: Option<String>,

    /// Inclusive start date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Directory holding <TICKER>.csv bar files
    #[arg(long = "data-dir", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// RSI reported for windows without gains or losses
    #[arg(long = "flat-rsi")]
    pub flat_rsi: Option<FlatRsiValue>,
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory receiving stock_data.csv and processed_data.csv
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Processed feature CSV (defaults to <artifacts-dir>/processed_data.csv)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub processed: Option<PathBuf>,

    /// Directory receiving model.json
    #[arg(long = "artifacts-dir", value_hint = clap::ValueHint::DirPath)]
    pub artifacts_dir: Option<PathBuf>,

    /// Number of trees in the forest
    #[arg(long)]
    pub trees: Option<usize>,

    /// Maximum depth of each tree
    #[arg(long = "max-depth")]
    pub max_depth: Option<usize>,

    /// Seed for bootstrap and feature sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub processed: Option<PathBuf>,

    #[arg(long = "artifacts-dir", value_hint = clap::ValueHint::DirPath)]
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BacktestArgs {
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub processed: Option<PathBuf>,

    #[arg(long = "artifacts-dir", value_hint = clap::ValueHint::DirPath)]
    pub artifacts_dir: Option<PathBuf>,

    /// Comma-separated probability thresholds
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub thresholds: Option<Vec<f64>>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory holding model.json and model_accuracy.txt; exports land here
    #[arg(long = "artifacts-dir", value_hint = clap::ValueHint::DirPath)]
    pub artifacts_dir: Option<PathBuf>,

    /// Probability the latest row must exceed to be called UP
    #[arg(long)]
    pub confidence: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FlatRsiValue {
    Neutral,
    Undefined,
}

impl FlatRsiValue {
    pub fn to_policy(self) -> FlatRsiPolicy {
        match self {
            FlatRsiValue::Neutral => FlatRsiPolicy::Neutral,
            FlatRsiValue::Undefined => FlatRsiPolicy::Undefined,
        }
    }
}

impl SourceArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(ticker) = &self.ticker {
            config.ticker = ticker.clone();
        }
        if let Some(start) = parse_optional_date(self.start.as_deref())? {
            config.start_date = start;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(policy) = self.flat_rsi {
            config.flat_rsi = policy.to_policy();
        }
        Ok(())
    }
}

fn set_dir(target: &mut PathBuf, value: &Option<PathBuf>) {
    if let Some(dir) = value {
        *target = dir.clone();
    }
}

impl Cli {
    /// Defaults, then the optional TOML file, then this command's flags.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };

        match &self.command {
            Commands::Prepare(args) => {
                args.source.apply(&mut config)?;
                set_dir(&mut config.artifacts_dir, &args.output_dir);
            }
            Commands::Train(args) => {
                set_dir(&mut config.artifacts_dir, &args.artifacts_dir);
                if let Some(trees) = args.trees {
                    config.forest.n_trees = trees;
                }
                if let Some(depth) = args.max_depth {
                    config.forest.max_depth = depth;
                }
                if let Some(seed) = args.seed {
                    config.forest.seed = seed;
                }
            }
            Commands::Evaluate(args) => set_dir(&mut config.artifacts_dir, &args.artifacts_dir),
            Commands::Backtest(args) => {
                set_dir(&mut config.artifacts_dir, &args.artifacts_dir);
                if let Some(thresholds) = &args.thresholds {
                    config.thresholds = thresholds.clone();
                }
            }
            Commands::Analyze(args) => {
                args.source.apply(&mut config)?;
                set_dir(&mut config.artifacts_dir, &args.artifacts_dir);
                if let Some(confidence) = args.confidence {
                    config.confidence_threshold = confidence;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Processed snapshot read by train, evaluate and backtest.
    pub fn processed_path(&self, config: &Config) -> PathBuf {
        let explicit = match &self.command {
            Commands::Train(args) => args.processed.as_deref(),
            Commands::Evaluate(args) => args.processed.as_deref(),
            Commands::Backtest(args) => args.processed.as_deref(),
            Commands::Prepare(_) | Commands::Analyze(_) => None,
        };
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.artifacts_dir.join(PROCESSED_FILE))
    }
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        Some(raw) => {
            let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Invalid date format for {raw}. Expected YYYY-MM-DD"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
