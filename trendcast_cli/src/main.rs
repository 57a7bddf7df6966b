mod cli;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::Parser;
use cli::{Cli, Commands};
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, prelude::*};

use trendcast_rs::backtest::run_threshold_backtest;
use trendcast_rs::config::Config;
use trendcast_rs::data::{
    BarSource, CsvBarSource, PROCESSED_FILE, RAW_SNAPSHOT_FILE, load_feature_table,
    write_bars_csv, write_feature_table,
};
use trendcast_rs::evaluate::{evaluate_model, load_model, save_accuracy, save_model, train_model};
use trendcast_rs::model::Classifier;
use trendcast_rs::pipeline::FeaturePipeline;
use trendcast_rs::report::{AnalysisRequest, run_analysis, stored_accuracy};

const LOG_FILE: &str = "trendcast.log";

fn init_tracing(log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("failed to create log directory {parent:?}: {err}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| anyhow!("failed to open log file {path:?}: {err}"))?;
        let (non_blocking_writer, guard) = non_blocking(file);
        // Leaked so the writer flushes until process exit.
        let _guard = Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    }
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    tracing::info!("==================== new trendcast_cli run ====================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "trendcast_cli invoked"
    );
    if argv.len() >= 2 {
        tracing::info!(
            "cargo_repro_command=cargo run --release -p trendcast_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

fn prepare(config: &Config) -> Result<()> {
    let source = CsvBarSource::new(&config.data_dir);
    let bars = source.fetch(&config.ticker, config.start_date)?;
    write_bars_csv(&config.artifacts_dir.join(RAW_SNAPSHOT_FILE), &bars)?;

    let table = FeaturePipeline::new(config.flat_rsi).run(&bars);
    if table.is_empty() {
        tracing::warn!(bars = bars.len(), "No labelled rows survived the feature pipeline");
    }
    let processed = config.artifacts_dir.join(PROCESSED_FILE);
    write_feature_table(&processed, &table)?;
    println!(
        "Prepared {} labelled rows from {} bars -> {}",
        table.len(),
        bars.len(),
        processed.display()
    );
    Ok(())
}

fn train(config: &Config, processed: &Path) -> Result<()> {
    let table = load_feature_table(processed)?;
    let model = train_model(&table, &config.forest, config.train_fraction)?;
    let path = config.model_path();
    save_model(&path, &model)?;
    println!("Model trained with {} trees -> {}", model.n_trees(), path.display());
    Ok(())
}

fn evaluate(config: &Config, processed: &Path) -> Result<()> {
    let table = load_feature_table(processed)?;
    let model = load_model(&config.model_path())?;
    let accuracy = evaluate_model(&model, &table, config.train_fraction)?;
    save_accuracy(&config.accuracy_path(), accuracy)?;
    println!("Model Accuracy: {accuracy:.4}");
    Ok(())
}

fn backtest(config: &Config, processed: &Path) -> Result<()> {
    let table = load_feature_table(processed)?;
    let model = load_model(&config.model_path())?;
    let probabilities = model.predict_proba(&table.feature_matrix());
    let reports = run_threshold_backtest(&table.returns(), &probabilities, &config.thresholds)?;
    if reports.is_empty() {
        tracing::warn!(rows = table.len(), "No threshold produced a usable backtest");
    }
    for report in &reports {
        println!("{report}");
    }
    Ok(())
}

/// Data errors halt before anything is printed. A model that cannot be
/// loaded still leaves the summary on stdout, then fails the command.
fn analyze(config: &Config) -> Result<()> {
    let model = load_model(&config.model_path());
    let accuracy = stored_accuracy(&config.accuracy_path())?;
    let source = CsvBarSource::new(&config.data_dir);
    let request = AnalysisRequest {
        ticker: &config.ticker,
        start: config.start_date,
        pipeline: FeaturePipeline::new(config.flat_rsi),
        confidence_threshold: config.confidence_threshold,
        export_dir: Some(&config.artifacts_dir),
    };
    let classifier = model.as_ref().ok().map(|model| model as &dyn Classifier);
    let report = run_analysis(&source, classifier, accuracy, &request)?;
    println!("{report}");
    model.map(|_| ())
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.resolve_config()?;

    let log_file = if cli.no_file_log {
        None
    } else {
        Some(config.artifacts_dir.join(LOG_FILE))
    };
    init_tracing(log_file.clone())?;
    log_invocation(log_file.as_ref());

    match &cli.command {
        Commands::Prepare(_) => prepare(&config),
        Commands::Train(_) => train(&config, &cli.processed_path(&config)),
        Commands::Evaluate(_) => evaluate(&config, &cli.processed_path(&config)),
        Commands::Backtest(_) => backtest(&config, &cli.processed_path(&config)),
        Commands::Analyze(_) => analyze(&config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
