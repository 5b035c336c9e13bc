//! actilyze - run accelerometer sleep/activity analyses and ingest their results
//!
//! Uses XDG Base Directory specification for file locations:
//! - Runtime state: $XDG_DATA_HOME/actilyze/runtime_path (~/.local/share/actilyze/runtime_path)
//! - Logs: $XDG_STATE_HOME/actilyze/actilyze.YYYY-MM-DD.log (~/.local/state/actilyze/, rotated daily)
//! - Config: $XDG_CONFIG_HOME/actilyze/config.toml (~/.config/actilyze/config.toml)

mod commands;

use actilyze_core::Config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "actilyze")]
#[command(about = "Run accelerometer analyses and ingest their results")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find and validate the Rscript interpreter
    Locate {
        /// Forget the remembered interpreter and search again
        #[arg(long)]
        forget: bool,
    },

    /// Estimate how long an analysis of the given inputs will take
    Estimate {
        /// Input recordings
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Run the analysis script over the given inputs
    Run {
        /// Directory the script writes its results to
        #[arg(short, long)]
        output: PathBuf,

        /// Analysis script (overrides runtime.script from config)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Script flag as flag=value (TRUE/FALSE or a number); repeatable
        #[arg(long = "arg", value_name = "FLAG=VALUE")]
        args: Vec<String>,

        /// Ingest the output directory after a successful run
        #[arg(long)]
        ingest: bool,

        /// Input recordings
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Rebuild snapshots from an analysis output directory
    ///
    /// Report documents are read as plain text, so only reports whose
    /// envelope lines are stored uncompressed (such as those written by
    /// `actilyze export`) can be decoded. PDFs with compressed content
    /// streams are counted as failed reports.
    Ingest {
        /// Analysis output directory
        dir: PathBuf,

        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a text report carrying a snapshot's data envelope
    ///
    /// The report is plain text even when named `*.pdf`, so that `ingest`
    /// can find the envelope again. Rendering it into a real PDF with
    /// compressed content streams hides the envelope from `ingest`.
    Export {
        /// Analysis output directory
        dir: PathBuf,

        /// Snapshot name (report file stem or run directory name)
        #[arg(long)]
        name: String,

        /// Report file to write
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        actilyze_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("actilyze starting");

    match args.command {
        Command::Locate { forget } => commands::locate(&config, forget).await,
        Command::Estimate { inputs } => commands::estimate(&config, &inputs).await,
        Command::Run {
            output,
            script,
            args,
            ingest,
            inputs,
        } => commands::run(&config, &inputs, &output, script, &args, ingest).await,
        Command::Ingest { dir, json } => commands::ingest(&config, &dir, json).await,
        Command::Export { dir, name, out } => commands::export(&config, &dir, &name, &out).await,
    }
}
