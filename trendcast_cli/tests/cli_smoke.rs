use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn trendcast(args: &[&str]) -> Output {
    let mut cmd = if let Some(bin) = option_env!("CARGO_BIN_EXE_trendcast_cli") {
        Command::new(bin)
    } else {
        let mut cmd = Command::new("cargo");
        cmd.args(["run", "-p", "trendcast_cli", "--"]);
        cmd
    };
    cmd.args(args)
        .current_dir(workspace_root())
        .output()
        .expect("failed to spawn trendcast_cli")
}

fn stage_sample(data_dir: &Path) {
    let sample_csv = workspace_root()
        .join("tests")
        .join("data")
        .join("ohlcv_daily.csv");
    assert!(
        sample_csv.exists(),
        "sample CSV missing at {}",
        sample_csv.display()
    );
    fs::create_dir_all(data_dir).expect("data dir");
    fs::copy(&sample_csv, data_dir.join("SAMPLE.csv")).expect("copy sample");
}

fn assert_success(output: &Output, step: &str) {
    assert!(
        output.status.success(),
        "{step} exited with {:?}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_runs_full_flow_on_sample_dataset() {
    let temp_dir = tempdir().expect("temp dir");
    let data_dir = temp_dir.path().join("data");
    let artifacts = temp_dir.path().join("artifacts");
    stage_sample(&data_dir);
    let data = data_dir.to_str().expect("data");
    let out = artifacts.to_str().expect("artifacts");

    let prepare = trendcast(&[
        "prepare",
        "--ticker",
        "sample",
        "--start",
        "2023-01-01",
        "--data-dir",
        data,
        "--output-dir",
        out,
    ]);
    assert_success(&prepare, "prepare");
    assert!(artifacts.join("stock_data.csv").exists());
    assert!(artifacts.join("processed_data.csv").exists());
    assert!(artifacts.join("trendcast.log").exists());

    let train = trendcast(&["--no-file-log", "train", "--artifacts-dir", out, "--trees", "20"]);
    assert_success(&train, "train");
    assert!(artifacts.join("model.json").exists());

    let evaluate = trendcast(&["--no-file-log", "evaluate", "--artifacts-dir", out]);
    assert_success(&evaluate, "evaluate");
    let accuracy: f64 = fs::read_to_string(artifacts.join("model_accuracy.txt"))
        .expect("accuracy file")
        .trim()
        .parse()
        .expect("numeric accuracy");
    assert!((0.0..=1.0).contains(&accuracy));

    let backtest = trendcast(&["--no-file-log", "backtest", "--artifacts-dir", out]);
    assert_success(&backtest, "backtest");
    let stdout = String::from_utf8_lossy(&backtest.stdout);
    assert!(
        stdout.contains("Threshold 0.5 | Strategy: "),
        "unexpected backtest output:\n{stdout}"
    );

    let analyze = trendcast(&[
        "--no-file-log",
        "analyze",
        "--ticker",
        "sample",
        "--start",
        "2023-01-01",
        "--data-dir",
        data,
        "--artifacts-dir",
        out,
    ]);
    assert_success(&analyze, "analyze");
    let stdout = String::from_utf8_lossy(&analyze.stdout);
    assert!(stdout.contains("Total Return: "), "unexpected report:\n{stdout}");
    assert!(stdout.contains("Prediction after 2023-08-11"));
    assert!(artifacts.join("SAMPLE_stock_data.csv").exists());
}

#[test]
fn missing_model_prints_summary_then_fails() {
    let temp_dir = tempdir().expect("temp dir");
    let data_dir = temp_dir.path().join("data");
    stage_sample(&data_dir);
    let artifacts = temp_dir.path().join("empty_artifacts");

    let output = trendcast(&[
        "--no-file-log",
        "analyze",
        "--ticker",
        "sample",
        "--data-dir",
        data_dir.to_str().expect("data"),
        "--artifacts-dir",
        artifacts.to_str().expect("artifacts"),
    ]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Total Return: "), "stdout:\n{stdout}");
    assert!(stdout.contains("Prediction unavailable: model not found"));
    assert!(artifacts.join("SAMPLE_stock_data.csv").exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("model not found at"), "stderr:\n{stderr}");
    assert!(!stderr.contains("panicked"));
}

#[test]
fn analyze_reports_missing_data_before_missing_model() {
    let temp_dir = tempdir().expect("temp dir");
    let output = trendcast(&[
        "--no-file-log",
        "analyze",
        "--ticker",
        "nope",
        "--data-dir",
        temp_dir.path().to_str().expect("dir"),
        "--artifacts-dir",
        temp_dir.path().join("out").to_str().expect("out"),
    ]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Total Return: "));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no price data available for ticker 'NOPE'"),
        "stderr:\n{stderr}"
    );
    assert!(!stderr.contains("model not found"));
}

#[test]
fn unknown_ticker_reports_unavailable_data() {
    let temp_dir = tempdir().expect("temp dir");
    let output = trendcast(&[
        "--no-file-log",
        "prepare",
        "--ticker",
        "nope",
        "--data-dir",
        temp_dir.path().to_str().expect("dir"),
        "--output-dir",
        temp_dir.path().join("out").to_str().expect("out"),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no price data available for ticker 'NOPE'"));
}
