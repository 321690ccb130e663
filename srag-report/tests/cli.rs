//! CLI tests spawning the `srag-report` binary.
//!
//! None of these reach the network: they cover commands without side effects
//! and the configuration failures that stop `run` before any Task starts.

use std::fs;
use std::process::Command;

use srag_report::exit_codes;
use srag_report::io::config::{AppConfig, DEFAULT_CONFIG_FILE};

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_srag-report"));
    for key in ["DATA_DIR", "OUTPUT_DIR", "MAX_NEWS_RESULTS", "API_CALLS_PER_MINUTE"] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn graph_prints_mermaid_topology() {
    let output = bin().arg("graph").output().expect("srag-report graph");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.starts_with("flowchart TD\n"));
    assert!(stdout.contains("-->|report| report"));
    assert!(stdout.contains("-->|terminate|"));
}

#[test]
fn init_config_writes_defaults_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = bin()
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let written = fs::read_to_string(temp.path().join(DEFAULT_CONFIG_FILE)).expect("read config");
    let parsed: AppConfig = toml::from_str(&written).expect("parse config");
    assert_eq!(parsed, AppConfig::default());

    let status = bin()
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("init-config again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = bin()
        .current_dir(temp.path())
        .args(["init-config", "--force"])
        .status()
        .expect("init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn run_rejects_invalid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(DEFAULT_CONFIG_FILE), "max_news_results = 0\n")
        .expect("write config");

    let output = bin()
        .current_dir(temp.path())
        .arg("run")
        .output()
        .expect("srag-report run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_news_results"), "stderr: {stderr}");
}

#[test]
fn run_requires_llm_api_key() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(DEFAULT_CONFIG_FILE),
        "[llm]\napi_key_env = \"SRAG_REPORT_TEST_MISSING_KEY\"\n",
    )
    .expect("write config");

    let output = bin()
        .current_dir(temp.path())
        .env_remove("SRAG_REPORT_TEST_MISSING_KEY")
        .arg("run")
        .output()
        .expect("srag-report run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SRAG_REPORT_TEST_MISSING_KEY"), "stderr: {stderr}");
}

#[test]
fn run_rejects_malformed_initial_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("initial.json"), "{not json").expect("write state");

    let output = bin()
        .current_dir(temp.path())
        .args(["run", "--initial-state", "initial.json"])
        .output()
        .expect("srag-report run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("initial state"), "stderr: {stderr}");
}
