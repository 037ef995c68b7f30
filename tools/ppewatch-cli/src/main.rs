//! ppewatch CLI: run and check the PPE compliance pipeline.
//!
//! Usage:
//!   ppewatch run --config <PATH> [OPTIONS]   Run the pipeline until Ctrl+C or SIGTERM
//!   ppewatch validate --config <PATH>        Check a configuration without running it
//!
//! Exit codes: 0 on clean shutdown, 1 on configuration errors, 2 when the
//! GPU worker cannot load its model.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ppewatch_runtime::SupervisorError;

mod commands;

#[derive(Parser)]
#[command(
    name = "ppewatch",
    about = "Supervised multi-camera PPE compliance monitoring",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline
    Run {
        /// Pipeline configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Equipment prompts file (YAML)
        #[arg(long)]
        prompts: Option<PathBuf>,

        /// ROI definition file applied to every camera
        #[arg(long)]
        roi: Option<PathBuf>,

        /// Selected ROI polygon names
        #[arg(long, value_delimiter = ',')]
        roi_polys: Vec<String>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Seconds without a heartbeat before a worker is restarted
        #[arg(long)]
        heartbeat_timeout: Option<f64>,

        /// Restarts allowed per worker within the restart window
        #[arg(long)]
        max_restarts: Option<u32>,

        /// Restart window length in seconds
        #[arg(long)]
        restart_window: Option<f64>,

        /// Persist and deliver confirmed alerts
        #[arg(long)]
        enable_alerts: bool,
    },

    /// Validate a configuration and equipment prompts
    Validate {
        /// Pipeline configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Equipment prompts file (YAML)
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            prompts,
            roi,
            roi_polys,
            log_file,
            heartbeat_timeout,
            max_restarts,
            restart_window,
            enable_alerts,
        } => {
            commands::run::run(commands::run::RunOptions {
                config,
                prompts,
                roi,
                roi_polys,
                log_file,
                heartbeat_timeout,
                max_restarts,
                restart_window,
                enable_alerts,
                verbose: cli.verbose,
            })
        }
        Commands::Validate { config, prompts } => commands::validate::run(config, prompts),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SupervisorError>() {
        Some(SupervisorError::GpuStartup(_)) => 2,
        _ => 1,
    }
}
