//! SRAG surveillance report CLI.
//!
//! `run` executes the workflow once and exits `0` when a report was produced,
//! `1` when the run ended without one, and `2` on invalid configuration or
//! input.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use srag_report::core::state::{InitialState, WorkflowState};
use srag_report::exit_codes;
use srag_report::graph;
use srag_report::io::config::{AppConfig, DEFAULT_CONFIG_FILE, Scheduling, load_config, write_config};
use srag_report::logging;
use srag_report::wiring::{build_engine, engine_options};

#[derive(Parser)]
#[command(
    name = "srag-report",
    version,
    about = "SRAG dataset and news workflow producing an HTML surveillance report"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workflow once.
    Run {
        /// Configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// News topic; overrides the initial state and `default_topic`.
        #[arg(long)]
        topic: Option<String>,
        /// JSON file with the initial state (`{"errors": [], "topic": ...}`).
        #[arg(long)]
        initial_state: Option<PathBuf>,
        /// Write the final state as JSON to this file.
        #[arg(long)]
        state_out: Option<PathBuf>,
        /// Branch scheduling; overrides `[engine] scheduling`.
        #[arg(long, value_enum)]
        scheduling: Option<SchedulingArg>,
    },
    /// Print the workflow topology as a Mermaid flowchart.
    Graph,
    /// Write a configuration file with default values.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchedulingArg {
    Parallel,
    DataFirst,
    NewsFirst,
}

impl From<SchedulingArg> for Scheduling {
    fn from(arg: SchedulingArg) -> Self {
        match arg {
            SchedulingArg::Parallel => Scheduling::Parallel,
            SchedulingArg::DataFirst => Scheduling::DataFirst,
            SchedulingArg::NewsFirst => Scheduling::NewsFirst,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            topic,
            initial_state,
            state_out,
            scheduling,
        } => cmd_run(
            &config,
            topic,
            initial_state.as_deref(),
            state_out.as_deref(),
            scheduling,
        ),
        Command::Graph => {
            print!("{}", graph::to_mermaid());
            Ok(exit_codes::OK)
        }
        Command::InitConfig { config, force } => cmd_init_config(&config, force),
    }
}

fn cmd_run(
    config_path: &Path,
    topic: Option<String>,
    initial_state_path: Option<&Path>,
    state_out: Option<&Path>,
    scheduling: Option<SchedulingArg>,
) -> Result<i32> {
    let cfg = load_config(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    logging::init(&cfg.log_level);

    let mut initial = match initial_state_path {
        Some(path) => read_initial_state(path)?,
        None => InitialState::default(),
    };
    if topic.is_some() {
        initial.topic = topic;
    }

    let mut options = engine_options(&cfg);
    if let Some(scheduling) = scheduling {
        options.scheduling = scheduling.into();
    }
    let engine = build_engine(&cfg, options).context("build workflow")?;
    let state = engine.run(initial);

    if let Some(path) = state_out {
        write_json(path, &state)?;
        info!(path = %path.display(), "final state written");
    }
    print_summary(&state);

    Ok(if state.final_report_path.is_some() {
        exit_codes::OK
    } else {
        exit_codes::NO_REPORT
    })
}

fn read_initial_state(path: &Path) -> Result<InitialState> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read initial state {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse initial state {}", path.display()))
}

fn print_summary(state: &WorkflowState) {
    match &state.final_report_path {
        Some(path) => println!("report: {}", path.display()),
        None => println!("report: none"),
    }
    println!(
        "articles: {} dataset: {}",
        state.article_count(),
        state
            .refined_dataset_path
            .as_ref()
            .map_or_else(|| "none".to_string(), |p| p.display().to_string())
    );
    for error in &state.errors {
        println!("error: {error}");
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AppConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
