//! buildtime command-line interface
//!
//! - `run`: execute stages and report on the run
//! - `history`: show the persisted run history

use clap::{Parser, Subcommand, ValueEnum};
use convenient_buildtime::{BuildTimeResult, TrackerConfig};
use std::path::{Path, PathBuf};

pub mod history;
pub mod run;

/// Time build stages and report bottlenecks, regressions and efficiency
#[derive(Parser)]
#[command(name = "buildtime")]
#[command(about = "Time build stages and report build-time analytics")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run stages in order and report on the build
    Run {
        /// Stage as NAME=COMMAND, repeatable, executed in order
        #[arg(short, long = "stage", value_parser = parse_stage, required = true)]
        stages: Vec<StageCommand>,

        /// Tracker configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// History file, overrides the configuration
        #[arg(long)]
        history: Option<PathBuf>,

        /// Continue with the next stage after a failure
        #[arg(short, long)]
        keep_going: bool,

        /// Report format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show persisted build history
    History {
        /// Tracker configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// History file, overrides the configuration
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Console summary
    Text,
    /// Report set as JSON
    Json,
    /// Markdown document
    Markdown,
}

/// One stage to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub name: String,
    pub command: String,
}

fn parse_stage(arg: &str) -> Result<StageCommand, String> {
    let (name, command) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COMMAND, got '{arg}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("stage name must not be empty".to_string());
    }
    if name == convenient_buildtime::TOTAL_STAGE {
        return Err(format!("'{name}' is reserved for the whole build"));
    }
    if command.trim().is_empty() {
        return Err(format!("stage '{name}' has no command"));
    }
    Ok(StageCommand {
        name: name.to_string(),
        command: command.to_string(),
    })
}

/// Configuration from `path` (or defaults) with an optional history override
pub fn load_config(path: Option<&Path>, history: Option<PathBuf>) -> BuildTimeResult<TrackerConfig> {
    let mut config = match path {
        Some(path) => TrackerConfig::from_yaml_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(history) = history {
        config.history_file = history;
    }
    Ok(config)
}
