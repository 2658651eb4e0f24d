//! buildtime - time build stages and report build-time analytics
//!
//! Runs each stage as a shell command, samples the running command's memory
//! and CPU, and prints a bottleneck report, a comparison with previous runs
//! and an efficiency score. History is kept in a JSON file between runs.

use clap::Parser;
use commands::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildtime=info,convenient_buildtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            stages,
            config,
            history,
            keep_going,
            format,
        } => {
            let succeeded = commands::run::execute(
                config.as_deref(),
                history,
                &stages,
                keep_going,
                format,
            )?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::History { config, history } => {
            commands::history::execute(config.as_deref(), history)?;
        }
    }
    Ok(())
}
